//! Unit tests for the decision engine

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tether_state::{Arbiter, NodeState, StateError, StateResult, StoreError};
use tether_types::{ConfiguredRole, DynamicRole};
use test_case::test_case;
use tokio_util::sync::CancellationToken;

use crate::*;

// ============================================================================
// Test Doubles
// ============================================================================

/// A participant answering from scripts. Each `dynamic_role` or `has_synced`
/// call consumes one entry of its script; the last entry repeats. A `None`
/// role is a failed call.
struct MockState {
    location: String,
    roles: Mutex<VecDeque<Option<DynamicRole>>>,
    configured: ConfiguredRole,
    synced: Mutex<VecDeque<bool>>,
    local: bool,
    never_ready: bool,
    ready_calls: AtomicUsize,
}

impl MockState {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            roles: Mutex::new(VecDeque::from([Some(DynamicRole::Initialized)])),
            configured: ConfiguredRole::Primary,
            synced: Mutex::new(VecDeque::from([false])),
            local: false,
            never_ready: false,
            ready_calls: AtomicUsize::new(0),
        }
    }

    fn roles(self, script: impl IntoIterator<Item = Option<DynamicRole>>) -> Self {
        *self.roles.lock().unwrap() = script.into_iter().collect();
        self
    }

    fn role(self, role: DynamicRole) -> Self {
        self.roles([Some(role)])
    }

    fn unreachable(self) -> Self {
        self.roles([None])
    }

    fn configured(mut self, configured: ConfiguredRole) -> Self {
        self.configured = configured;
        self
    }

    fn synced(self, synced: bool) -> Self {
        self.synced_script([synced])
    }

    fn synced_script(self, script: impl IntoIterator<Item = bool>) -> Self {
        *self.synced.lock().unwrap() = script.into_iter().collect();
        self
    }

    /// Failures look like a broken record store instead of a network error.
    fn local(mut self) -> Self {
        self.local = true;
        self
    }

    fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    fn failure(&self) -> StateError {
        if self.local {
            StateError::Store(StoreError::InvalidKey(String::new()))
        } else {
            StateError::ConnectionClosed {
                addr: self.location.clone(),
            }
        }
    }
}

fn next_scripted<T: Copy>(script: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut script = script.lock().unwrap();
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().copied()
    }
}

impl NodeState for MockState {
    async fn dynamic_role(&self) -> StateResult<DynamicRole> {
        next_scripted(&self.roles)
            .flatten()
            .ok_or_else(|| self.failure())
    }

    async fn configured_role(&self) -> StateResult<ConfiguredRole> {
        Ok(self.configured)
    }

    async fn has_synced(&self) -> StateResult<bool> {
        Ok(next_scripted(&self.synced).unwrap_or(false))
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn ready(&self) {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        if self.never_ready {
            std::future::pending::<()>().await;
        }
    }
}

/// An arbiter whose bounced calls all answer from one shared script.
struct MockArbiter {
    state: MockState,
    bounced: Arc<MockState>,
    bounces: Mutex<Vec<String>>,
}

impl MockArbiter {
    fn new(bounced: MockState) -> Self {
        Self {
            state: MockState::new("arbiter:4400").role(DynamicRole::Dead),
            bounced: Arc::new(bounced),
            bounces: Mutex::new(Vec::new()),
        }
    }

    fn bounces(&self) -> Vec<String> {
        self.bounces.lock().unwrap().clone()
    }
}

impl NodeState for MockArbiter {
    async fn dynamic_role(&self) -> StateResult<DynamicRole> {
        self.state.dynamic_role().await
    }

    async fn configured_role(&self) -> StateResult<ConfiguredRole> {
        Ok(ConfiguredRole::Arbiter)
    }

    async fn has_synced(&self) -> StateResult<bool> {
        Ok(false)
    }

    fn location(&self) -> &str {
        self.state.location()
    }

    async fn ready(&self) {
        self.state.ready().await;
    }
}

impl Arbiter for MockArbiter {
    type Bounced = Arc<MockState>;

    fn bounce(&self, target: &str) -> Arc<MockState> {
        self.bounces.lock().unwrap().push(target.to_string());
        Arc::clone(&self.bounced)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Initialize,
    Start,
    Stop,
    Active,
    Backup,
    Single,
    Run,
    Shutdown,
}

/// Records every request and how many were in flight at once.
#[derive(Default)]
struct RecordingPerformer {
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    fail_on: Option<Call>,
}

impl RecordingPerformer {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing_on(call: Call) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, call: Call) -> ControllerResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().unwrap().push(call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on == Some(call) {
            Err(ControllerError::StartFailed(format!("scripted failure on {call:?}")))
        } else {
            Ok(())
        }
    }
}

impl Performer for RecordingPerformer {
    async fn initialize(&self) -> ControllerResult<()> {
        self.record(Call::Initialize).await
    }

    async fn start(&self) -> ControllerResult<()> {
        self.record(Call::Start).await
    }

    async fn stop(&self) -> ControllerResult<()> {
        self.record(Call::Stop).await
    }

    async fn transition_to_active(&self) -> ControllerResult<()> {
        self.record(Call::Active).await
    }

    async fn transition_to_backup(&self) -> ControllerResult<()> {
        self.record(Call::Backup).await
    }

    async fn transition_to_single(&self) -> ControllerResult<()> {
        self.record(Call::Single).await
    }

    async fn run(&self) -> ControllerResult<()> {
        self.record(Call::Run).await
    }

    async fn shutdown(&self) -> ControllerResult<()> {
        self.record(Call::Shutdown).await
    }
}

type TestDecider = Decider<Arc<MockState>, Arc<MockState>, Arc<MockArbiter>, RecordingPerformer>;

struct Cluster {
    me: Arc<MockState>,
    other: Arc<MockState>,
    arbiter: Arc<MockArbiter>,
    performer: Arc<RecordingPerformer>,
}

impl Cluster {
    fn new(me: MockState, other: MockState, arbiter: MockArbiter) -> Self {
        Self::with_performer(me, other, arbiter, RecordingPerformer::default())
    }

    fn with_performer(
        me: MockState,
        other: MockState,
        arbiter: MockArbiter,
        performer: RecordingPerformer,
    ) -> Self {
        Self {
            me: Arc::new(me.local()),
            other: Arc::new(other),
            arbiter: Arc::new(arbiter),
            performer: Arc::new(performer),
        }
    }

    fn decider(&self) -> TestDecider {
        Decider::new(
            Arc::clone(&self.me),
            Arc::clone(&self.other),
            Arc::clone(&self.arbiter),
            Arc::clone(&self.performer),
        )
        .with_retry_pause(Duration::ZERO)
    }

    fn calls(&self) -> Vec<Call> {
        self.performer.calls()
    }
}

fn me() -> MockState {
    MockState::new("10.0.0.1:4400")
}

fn peer() -> MockState {
    MockState::new("10.0.0.2:4400")
}

fn arbiter_unreachable() -> MockArbiter {
    MockArbiter::new(MockState::new("10.0.0.2:4400").unreachable())
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================================
// Branch Table
// ============================================================================

#[test_case(DynamicRole::Active, ConfiguredRole::Primary, DynamicRole::Active, false => (vec![Call::Backup], false); "peer active demotes")]
#[test_case(DynamicRole::Single, ConfiguredRole::Primary, DynamicRole::Initialized, false => (vec![Call::Backup], false); "peer single demotes")]
#[test_case(DynamicRole::Backup, ConfiguredRole::Secondary, DynamicRole::Backup, false => (vec![Call::Active], false); "peer backup promotes")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Primary, DynamicRole::Active, false => (vec![Call::Single], false); "peer dead while active goes single")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Secondary, DynamicRole::Backup, true => (vec![Call::Single], false); "peer dead while synced backup goes single")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Secondary, DynamicRole::Backup, false => (vec![Call::Stop], true); "peer dead while unsynced backup stops")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Secondary, DynamicRole::Initialized, false => (vec![Call::Stop], true); "peer dead while never replicated stops")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Secondary, DynamicRole::Initialized, true => (vec![Call::Single], false); "peer dead while synced initialized goes single")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Primary, DynamicRole::Dead, false => (vec![Call::Stop], true); "peer dead while stopped unsynced stops")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Primary, DynamicRole::Dead, true => (vec![Call::Single], false); "peer dead while stopped synced goes single")]
#[test_case(DynamicRole::Dead, ConfiguredRole::Primary, DynamicRole::Single, false => (vec![Call::Single], false); "peer dead while single stays single")]
#[test_case(DynamicRole::Initialized, ConfiguredRole::Primary, DynamicRole::Initialized, false => (vec![Call::Active], false); "fresh primary goes active")]
#[test_case(DynamicRole::Initialized, ConfiguredRole::Secondary, DynamicRole::Initialized, false => (vec![Call::Backup], false); "fresh secondary goes backup")]
#[test_case(DynamicRole::Initialized, ConfiguredRole::Arbiter, DynamicRole::Initialized, false => (vec![], false); "fresh arbiter does nothing")]
fn recheck_branch_table(
    peer_role: DynamicRole,
    configured: ConfiguredRole,
    self_role: DynamicRole,
    synced: bool,
) -> (Vec<Call>, bool) {
    let cluster = Cluster::new(
        me().role(self_role).configured(configured).synced(synced),
        peer().role(peer_role),
        arbiter_unreachable(),
    );

    let result = block_on(cluster.decider().recheck());
    let unavailable = match result {
        Ok(()) => false,
        Err(e) => {
            assert!(e.is_cluster_unavailable(), "unexpected error: {e}");
            true
        }
    };

    assert!(cluster.arbiter.bounces().is_empty());
    (cluster.calls(), unavailable)
}

// ============================================================================
// Bounce Path
// ============================================================================

#[tokio::test]
async fn unreachable_peer_is_bounced_once_through_arbiter() {
    let cluster = Cluster::new(
        me().role(DynamicRole::Active),
        peer().unreachable(),
        MockArbiter::new(peer().role(DynamicRole::Backup)),
    );

    cluster.decider().recheck().await.unwrap();

    assert_eq!(cluster.arbiter.bounces(), vec!["10.0.0.2:4400".to_string()]);
    assert_eq!(cluster.calls(), vec![Call::Active]);
}

#[tokio::test]
async fn bounced_dead_peer_is_handled_like_direct() {
    let cluster = Cluster::new(
        me().role(DynamicRole::Backup).synced(true),
        peer().unreachable(),
        MockArbiter::new(peer().role(DynamicRole::Dead)),
    );

    cluster.decider().recheck().await.unwrap();

    assert_eq!(cluster.calls(), vec![Call::Single]);
}

#[tokio::test]
async fn isolated_single_node_keeps_serving() {
    let cluster = Cluster::new(
        me().role(DynamicRole::Single),
        peer().unreachable(),
        arbiter_unreachable(),
    );

    cluster.decider().recheck().await.unwrap();

    assert_eq!(cluster.arbiter.bounces().len(), 1);
    assert!(cluster.calls().is_empty());
}

#[test_case(DynamicRole::Active; "active")]
#[test_case(DynamicRole::Backup; "backup")]
#[test_case(DynamicRole::Initialized; "initialized")]
#[test_case(DynamicRole::Dead; "dead")]
fn isolated_node_stops_unless_single(self_role: DynamicRole) {
    let cluster = Cluster::new(me().role(self_role), peer().unreachable(), arbiter_unreachable());

    let err = block_on(cluster.decider().recheck()).unwrap_err();

    assert!(err.is_cluster_unavailable());
    assert_eq!(cluster.calls(), vec![Call::Stop]);
}

#[tokio::test]
async fn isolated_node_with_unreadable_role_stops_and_fails() {
    let cluster = Cluster::new(me().unreachable(), peer().unreachable(), arbiter_unreachable());

    let err = cluster.decider().recheck().await.unwrap_err();

    assert!(matches!(err, MonitorError::State(StateError::Store(_))), "got {err}");
    assert_eq!(cluster.calls(), vec![Call::Stop]);
}

// ============================================================================
// Error Propagation
// ============================================================================

#[tokio::test]
async fn local_state_error_is_fatal() {
    let cluster = Cluster::new(me().unreachable(), peer().role(DynamicRole::Dead), arbiter_unreachable());

    let err = cluster.decider().recheck().await.unwrap_err();

    assert!(!err.is_cluster_unavailable());
    assert!(matches!(err, MonitorError::State(_)));
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn performer_error_is_fatal() {
    let cluster = Cluster::with_performer(
        me().role(DynamicRole::Active),
        peer().role(DynamicRole::Active),
        arbiter_unreachable(),
        RecordingPerformer::failing_on(Call::Backup),
    );

    let err = cluster.decider().recheck().await.unwrap_err();

    assert!(matches!(err, MonitorError::Controller(_)), "got {err}");
}

#[tokio::test]
async fn manual_promote_and_demote_bypass_peer() {
    let cluster = Cluster::new(me(), peer().unreachable(), arbiter_unreachable());
    let decider = cluster.decider();

    decider.promote().await.unwrap();
    decider.demote().await.unwrap();

    assert_eq!(cluster.calls(), vec![Call::Active, Call::Backup]);
    assert!(cluster.arbiter.bounces().is_empty());
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn start_waits_for_cluster_then_decides() {
    let cluster = Cluster::new(
        me().configured(ConfiguredRole::Primary),
        peer().role(DynamicRole::Initialized),
        arbiter_unreachable(),
    );

    let decider = Decider::start(
        Arc::clone(&cluster.me),
        Arc::clone(&cluster.other),
        Arc::clone(&cluster.arbiter),
        Arc::clone(&cluster.performer),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(cluster.other.ready_calls(), 1);
    assert_eq!(cluster.arbiter.state.ready_calls(), 1);
    assert_eq!(cluster.me.ready_calls(), 0);
    assert_eq!(cluster.calls(), vec![Call::Active]);
    drop(decider);
}

#[tokio::test]
async fn recheck_goes_single_once_backup_has_synced() {
    let cluster = Cluster::new(
        me().role(DynamicRole::Backup).synced_script([false, true]),
        peer().role(DynamicRole::Dead),
        arbiter_unreachable(),
    );
    let decider = cluster.decider();

    let first = decider.recheck().await.unwrap_err();
    assert!(first.is_cluster_unavailable(), "got {first}");
    assert_eq!(cluster.calls(), vec![Call::Stop]);

    decider.recheck().await.unwrap();
    assert_eq!(cluster.calls(), vec![Call::Stop, Call::Single]);
}

#[tokio::test]
async fn start_retries_until_unsynced_backup_may_go_single() {
    let cluster = Cluster::new(
        me().role(DynamicRole::Backup).synced_script([false, true]),
        peer().role(DynamicRole::Dead),
        arbiter_unreachable(),
    );

    cluster
        .decider()
        .join(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cluster.calls(), vec![Call::Stop, Call::Single]);
    assert_eq!(cluster.other.ready_calls(), 2);
    assert_eq!(cluster.arbiter.state.ready_calls(), 2);
}

#[tokio::test]
async fn start_retries_after_partition_heals() {
    let cluster = Cluster::new(
        me().role(DynamicRole::Active),
        peer().roles([None, Some(DynamicRole::Dead)]),
        arbiter_unreachable(),
    );

    cluster
        .decider()
        .join(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cluster.calls(), vec![Call::Stop, Call::Single]);
    assert_eq!(cluster.arbiter.bounces().len(), 1);
}

#[tokio::test]
async fn start_returns_fatal_errors() {
    let cluster = Cluster::new(me().unreachable(), peer().role(DynamicRole::Dead), arbiter_unreachable());

    let result = cluster.decider().join(&CancellationToken::new()).await;

    assert!(matches!(result, Err(MonitorError::State(_))));
}

#[tokio::test]
async fn start_can_be_cancelled_while_waiting() {
    let cluster = Cluster::new(me(), peer().never_ready(), arbiter_unreachable());
    let cancel = CancellationToken::new();

    let waiting = tokio::spawn({
        let decider = cluster.decider();
        let cancel = cancel.clone();
        async move { decider.join(&cancel).await.map(|_| ()) }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(MonitorError::Cancelled)));
    assert!(cluster.calls().is_empty());
}

// ============================================================================
// Decision Loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn run_first_checks_after_one_period() {
    let cluster = Cluster::new(me(), peer().role(DynamicRole::Backup), arbiter_unreachable());
    let decider = cluster.decider();

    let early = tokio::time::timeout(Duration::from_secs(1), decider.run(Duration::from_secs(2))).await;
    assert!(early.is_err());
    assert!(cluster.calls().is_empty());

    let later = tokio::time::timeout(Duration::from_secs(5), decider.run(Duration::from_secs(2))).await;
    assert!(later.is_err());
    assert_eq!(cluster.calls(), vec![Call::Active, Call::Active]);
}

#[tokio::test(start_paused = true)]
async fn run_survives_unavailable_cluster() {
    let cluster = Cluster::new(
        me().role(DynamicRole::Active),
        peer().roles([None, None, Some(DynamicRole::Dead)]),
        arbiter_unreachable(),
    );
    let decider = cluster.decider();

    let ran = tokio::time::timeout(Duration::from_millis(3500), decider.run(Duration::from_secs(1))).await;

    assert!(ran.is_err(), "loop must keep going");
    assert_eq!(cluster.calls(), vec![Call::Stop, Call::Stop, Call::Single]);
}

#[tokio::test(start_paused = true)]
async fn run_ends_on_fatal_error() {
    let cluster = Cluster::new(me().unreachable(), peer().role(DynamicRole::Dead), arbiter_unreachable());

    let result = cluster.decider().run(Duration::from_secs(2)).await;

    assert!(matches!(result, Err(MonitorError::State(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn decisions_never_overlap() {
    let cluster = Cluster::with_performer(
        me().role(DynamicRole::Active),
        peer().role(DynamicRole::Backup),
        arbiter_unreachable(),
        RecordingPerformer::slow(Duration::from_millis(5)),
    );
    let decider = Arc::new(cluster.decider());

    let mut tasks = Vec::new();
    for i in 0..24 {
        let decider = Arc::clone(&decider);
        tasks.push(tokio::spawn(async move {
            match i % 3 {
                0 => decider.recheck().await,
                1 => decider.promote().await,
                _ => decider.demote().await,
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(cluster.calls().len(), 24);
    assert_eq!(cluster.performer.max_in_flight.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Property Tests
// ============================================================================

fn any_dynamic_role() -> impl Strategy<Value = DynamicRole> {
    prop::sample::select(DynamicRole::ALL.to_vec())
}

fn any_replica_role() -> impl Strategy<Value = DynamicRole> {
    prop::sample::select(
        DynamicRole::ALL
            .into_iter()
            .filter(|role| !role.is_writable())
            .collect::<Vec<_>>(),
    )
}

fn any_configured_role() -> impl Strategy<Value = ConfiguredRole> {
    prop::sample::select(vec![
        ConfiguredRole::Primary,
        ConfiguredRole::Secondary,
        ConfiguredRole::Arbiter,
    ])
}

proptest! {
    #[test]
    fn unsynced_replica_never_goes_single(
        peer_role in any_dynamic_role(),
        self_role in any_replica_role(),
        configured in any_configured_role(),
        direct in any::<bool>(),
    ) {
        let (other, arbiter) = if direct {
            (peer().role(peer_role), arbiter_unreachable())
        } else {
            (peer().unreachable(), MockArbiter::new(peer().role(peer_role)))
        };
        let cluster = Cluster::new(
            me().role(self_role).configured(configured).synced(false),
            other,
            arbiter,
        );

        let _ = block_on(cluster.decider().recheck());

        prop_assert!(!cluster.calls().contains(&Call::Single));
    }

    #[test]
    fn never_active_beside_a_writable_peer(
        peer_writable in any::<bool>(),
        self_role in any_dynamic_role(),
        configured in any_configured_role(),
        synced in any::<bool>(),
    ) {
        let peer_role = if peer_writable { DynamicRole::Active } else { DynamicRole::Single };
        let cluster = Cluster::new(
            me().role(self_role).configured(configured).synced(synced),
            peer().role(peer_role),
            arbiter_unreachable(),
        );

        block_on(cluster.decider().recheck()).unwrap();

        prop_assert_eq!(cluster.calls(), vec![Call::Backup]);
    }

    #[test]
    fn exactly_one_bounce_per_failed_direct_check(
        bounced_role in prop::option::of(any_dynamic_role()),
        self_role in any_dynamic_role(),
    ) {
        let cluster = Cluster::new(
            me().role(self_role).synced(true),
            peer().unreachable(),
            MockArbiter::new(peer().roles([bounced_role])),
        );

        let _ = block_on(cluster.decider().recheck());

        prop_assert_eq!(cluster.arbiter.bounces(), vec!["10.0.0.2:4400".to_string()]);
    }
}
