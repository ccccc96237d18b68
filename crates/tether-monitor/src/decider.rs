//! The decision engine.
//!
//! The engine looks at what its peer is doing and asks the [`Performer`] to
//! move this node into the complementary role:
//!
//! | Peer role     | This node                                                  |
//! |---------------|------------------------------------------------------------|
//! | `active`      | backup                                                     |
//! | `single`      | backup                                                     |
//! | `backup`      | active                                                     |
//! | `dead`        | single if active, single or synced; otherwise stop         |
//! | `initialized` | active if configured primary, backup if secondary          |
//!
//! When the peer cannot be reached directly the engine asks the arbiter to
//! look on its behalf. Only when both paths fail does it conclude that it is
//! the isolated one, and it stops the database unless it is already serving
//! alone.

use std::sync::Arc;
use std::time::Duration;

use tether_state::{Arbiter, NodeState, StateError};
use tether_types::{ConfiguredRole, DynamicRole};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::performer::Performer;

/// Pause between failed attempts to join the cluster at startup.
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// How the peer's role was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Direct,
    Bounced,
}

/// Decides which role this node should hold and drives the [`Performer`]
/// there.
///
/// `recheck`, `promote` and `demote` are serialized by one async lock, so a
/// manual promotion can never interleave with a periodic recheck.
pub struct Decider<M, O, A, P> {
    me: M,
    other: O,
    arbiter: A,
    performer: Arc<P>,
    lock: Mutex<()>,
    retry_pause: Duration,
    span: Span,
}

impl<M, O, A, P> Decider<M, O, A, P>
where
    M: NodeState,
    O: NodeState,
    A: Arbiter,
    P: Performer,
{
    /// Builds an engine without contacting anyone.
    pub fn new(me: M, other: O, arbiter: A, performer: Arc<P>) -> Self {
        let span = info_span!("decider", me = me.location(), peer = other.location());
        Self {
            me,
            other,
            arbiter,
            performer,
            lock: Mutex::new(()),
            retry_pause: DEFAULT_RETRY_PAUSE,
            span,
        }
    }

    /// Replaces the span every decision is logged under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Sets the pause between failed attempts to join the cluster.
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Waits for the peer and the arbiter, then makes the first decision.
    ///
    /// Shorthand for [`Decider::new`] followed by [`Decider::join`].
    pub async fn start(
        me: M,
        other: O,
        arbiter: A,
        performer: Arc<P>,
        cancel: &CancellationToken,
    ) -> MonitorResult<Self> {
        Self::new(me, other, arbiter, performer).join(cancel).await
    }

    /// Waits for the whole cluster, then rechecks, until a recheck succeeds.
    ///
    /// A quorum of two would be enough in most cases, but a backup that was
    /// down while the active also went away must not decide anything until
    /// both others are back, so this always waits for all three.
    pub async fn join(self, cancel: &CancellationToken) -> MonitorResult<Self> {
        let span = self.span.clone();
        async move {
            loop {
                info!("waiting for cluster to be ready");
                tokio::select! {
                    () = cancel.cancelled() => return Err(MonitorError::Cancelled),
                    () = async {
                        self.other.ready().await;
                        self.arbiter.ready().await;
                    } => {}
                }
                info!("cluster is ready");

                match self.recheck().await {
                    Ok(()) => return Ok(self),
                    Err(e) if e.is_cluster_unavailable() => {
                        info!("cluster unavailable, waiting again");
                    }
                    Err(e) => return Err(e),
                }

                tokio::select! {
                    () = cancel.cancelled() => return Err(MonitorError::Cancelled),
                    () = sleep(self.retry_pause) => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Rechecks every `period`, starting one period from now.
    ///
    /// [`MonitorError::ClusterUnavailable`] is expected while the cluster is
    /// degraded and does not end the loop; any other error does.
    pub async fn run(&self, period: Duration) -> MonitorResult<()> {
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            match self.recheck().await {
                Ok(()) => {}
                Err(e) if e.is_cluster_unavailable() => {
                    debug!(parent: &self.span, "cluster unavailable");
                }
                Err(e) => {
                    error!(parent: &self.span, error = %e, "recheck failed, leaving decision loop");
                    return Err(e);
                }
            }
        }
    }

    /// Looks at the peer and moves this node into the matching role.
    pub async fn recheck(&self) -> MonitorResult<()> {
        let _guard = self.lock.lock().await;
        self.recheck_locked().instrument(self.span.clone()).await
    }

    /// Makes this node active, regardless of its peer.
    pub async fn promote(&self) -> MonitorResult<()> {
        let _guard = self.lock.lock().await;
        info!(parent: &self.span, "manual promotion");
        self.performer.transition_to_active().await?;
        Ok(())
    }

    /// Makes this node a backup, regardless of its peer.
    pub async fn demote(&self) -> MonitorResult<()> {
        let _guard = self.lock.lock().await;
        info!(parent: &self.span, "manual demotion");
        self.performer.transition_to_backup().await?;
        Ok(())
    }

    async fn recheck_locked(&self) -> MonitorResult<()> {
        debug!("checking peer role");
        let (peer_role, path) = match self.other.dynamic_role().await {
            Ok(role) => (role, Path::Direct),
            Err(direct) => {
                info!(error = %direct, transport = direct.is_transport(), "peer unreachable, bouncing through arbiter");
                let bounced = self.arbiter.bounce(self.other.location());
                match bounced.dynamic_role().await {
                    Ok(role) => (role, Path::Bounced),
                    Err(bounce) => return self.isolated(&bounce).await,
                }
            }
        };

        match peer_role {
            DynamicRole::Active | DynamicRole::Single => {
                info!(%peer_role, ?path, transition = "backup", "peer is serving writes");
                self.performer.transition_to_backup().await?;
            }
            DynamicRole::Backup => {
                info!(%peer_role, ?path, transition = "active", "peer is a backup");
                self.performer.transition_to_active().await?;
            }
            DynamicRole::Dead => self.peer_dead(path).await?,
            DynamicRole::Initialized => self.peer_initialized(path).await?,
        }
        Ok(())
    }

    /// Neither the peer nor the arbiter answered.
    async fn isolated(&self, cause: &StateError) -> MonitorResult<()> {
        // The arbiter answered but could not reach the peer either
        let arbiter_reached = cause.is_bounce_unreachable();
        match self.me.dynamic_role().await {
            Ok(DynamicRole::Single) => {
                info!(error = %cause, arbiter_reached, self_role = "single", transition = "none", "peer unreachable on both paths, staying single");
                Ok(())
            }
            Ok(self_role) => {
                warn!(error = %cause, arbiter_reached, %self_role, transition = "stop", "peer unreachable on both paths, stopping database");
                self.performer.stop().await?;
                Err(MonitorError::ClusterUnavailable)
            }
            Err(e) => {
                error!(error = %e, transition = "stop", "cannot read own role while isolated, stopping database");
                if let Err(stop) = self.performer.stop().await {
                    error!(error = %stop, "failed to stop database");
                }
                Err(e.into())
            }
        }
    }

    async fn peer_dead(&self, path: Path) -> MonitorResult<()> {
        let self_role = self.me.dynamic_role().await?;
        if !self_role.is_writable() && !self.me.has_synced().await? {
            warn!(peer_role = "dead", ?path, %self_role, synced = false, transition = "stop", "peer is dead but this replica may be behind, stopping database");
            self.performer.stop().await?;
            return Err(MonitorError::ClusterUnavailable);
        }

        info!(peer_role = "dead", ?path, %self_role, transition = "single", "peer is dead");
        self.performer.transition_to_single().await?;
        Ok(())
    }

    async fn peer_initialized(&self, path: Path) -> MonitorResult<()> {
        let configured = self.me.configured_role().await?;
        match configured {
            ConfiguredRole::Primary => {
                info!(peer_role = "initialized", ?path, %configured, transition = "active", "fresh cluster");
                self.performer.transition_to_active().await?;
            }
            ConfiguredRole::Secondary => {
                info!(peer_role = "initialized", ?path, %configured, transition = "backup", "fresh cluster");
                self.performer.transition_to_backup().await?;
            }
            ConfiguredRole::Arbiter => {
                warn!(peer_role = "initialized", ?path, %configured, transition = "none", "arbiter has no database role to take");
            }
        }
        Ok(())
    }
}
