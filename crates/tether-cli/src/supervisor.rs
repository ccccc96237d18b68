//! Wires the node together and supervises it until shutdown.

use std::backtrace::Backtrace;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tether_config::TetherConfig;
use tether_monitor::{
    CommandController, ControllerSettings, DatabaseCommands, Decider, Performer,
};
use tether_state::{LocalState, RecordStore, RemoteState, RequestHandler, RpcServer};
use tether_types::ConfiguredRole;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

use crate::signals::{Received, Signals};

/// Runs this node until it is told to stop or something fatal happens.
pub async fn run(config: TetherConfig) -> Result<()> {
    let role = config.role()?;
    let store = Arc::new(
        RecordStore::open(&config.node.status_dir).with_context(|| {
            format!(
                "failed to open status directory {}",
                config.node.status_dir.display()
            )
        })?,
    );
    info!(path = %store.root().display(), "opened status directory");
    let local = LocalState::open(role, config.node.advertise.clone(), store)
        .context("failed to open local state")?;

    let handler = RequestHandler::new(local.clone(), config.timing.rpc_timeout());
    let server = RpcServer::bind(config.listen_address(), handler)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_address()))?;
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(cancel.child_token()));

    let mut signals = Signals::install().context("failed to install signal handlers")?;
    info!(%role, advertise = %config.node.advertise, "tether started");

    let result = if role.runs_database() {
        supervise(&config, role, local, &mut signals).await
    } else {
        serve_as_monitor(&local, &mut signals).await
    };

    cancel.cancel();
    if let Err(e) = server_task.await {
        warn!(error = %e, "rpc server task ended abnormally");
    }
    result
}

/// The monitor only answers RPCs; it has no database to manage.
async fn serve_as_monitor(local: &LocalState, signals: &mut Signals) -> Result<()> {
    loop {
        match signals.recv().await {
            Received::Terminate(signal) => {
                info!(signal, "shutting down");
                return Ok(());
            }
            Received::Diagnostics => diagnostics(local, None).await,
        }
    }
}

async fn supervise(
    config: &TetherConfig,
    role: ConfiguredRole,
    local: LocalState,
    signals: &mut Signals,
) -> Result<()> {
    let peer = config
        .peer_address()
        .context("database node has no peer address")?;
    let monitor = config
        .monitor_address()
        .context("database node has no monitor address")?;
    let timing = &config.timing;

    let controller = Arc::new(CommandController::new(
        local.clone(),
        database_commands(config)?,
        ControllerSettings {
            start_grace: timing.start_grace(),
            stop_timeout: timing.stop_timeout(),
            sync_poll: timing.sync_poll(),
        },
    ));

    controller
        .initialize()
        .await
        .context("failed to initialize database")?;
    controller.start().await.context("failed to start database")?;

    let other = RemoteState::new(peer, timing.rpc_timeout()).with_ready_retry(timing.ready_retry());
    let arbiter =
        RemoteState::new(monitor, timing.rpc_timeout()).with_ready_retry(timing.ready_retry());
    let span = info_span!("decider", %role, me = %config.node.advertise, peer);
    let decider = Decider::new(local.clone(), other, arbiter, Arc::clone(&controller))
        .with_span(span)
        .with_retry_pause(timing.ready_retry());

    // Joining can take arbitrarily long while the others are down
    let join_cancel = CancellationToken::new();
    let joining = decider.join(&join_cancel);
    tokio::pin!(joining);
    let decider = loop {
        tokio::select! {
            joined = &mut joining => break joined.context("failed to join the cluster")?,
            received = signals.recv() => match received {
                Received::Diagnostics => diagnostics(&local, Some(&controller)).await,
                Received::Terminate(signal) => {
                    info!(signal, "shutting down before the cluster was ready");
                    join_cancel.cancel();
                    controller.shutdown().await.context("failed to stop database")?;
                    return Ok(());
                }
            },
        }
    };
    let decider = Arc::new(decider);

    let mut decisions = tokio::spawn({
        let decider = Arc::clone(&decider);
        let period = timing.check_interval();
        async move { decider.run(period).await }
    });
    let mut database = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run().await }
    });
    let mut stopping = false;

    loop {
        tokio::select! {
            decided = &mut decisions, if !stopping => {
                let err = match decided {
                    Ok(Ok(())) => anyhow::anyhow!("decision loop ended"),
                    Ok(Err(e)) => anyhow::Error::new(e).context("decision loop failed"),
                    Err(e) => anyhow::Error::new(e).context("decision loop panicked"),
                };
                error!(error = %err, "stopping database");
                if let Err(e) = controller.shutdown().await {
                    error!(error = %e, "failed to stop database");
                }
                database.abort();
                return Err(err);
            }
            ran = &mut database => {
                decisions.abort();
                return match ran {
                    Ok(Ok(())) => {
                        info!("the database was shut down");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e).context("the database controller stopped"),
                    Err(e) => Err(e).context("the database controller panicked"),
                };
            }
            received = signals.recv() => match received {
                Received::Diagnostics => diagnostics(&local, Some(&controller)).await,
                Received::Terminate(signal) if !stopping => {
                    info!(signal, "shutting down the database");
                    stopping = true;
                    decisions.abort();
                    // The controller loop ends once the database is down
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move {
                        if let Err(e) = controller.shutdown().await {
                            error!(error = %e, "failed to stop database");
                        }
                    });
                    info!("waiting for the database");
                }
                Received::Terminate(signal) => {
                    bail!("received {signal} again before the database stopped");
                }
            },
        }
    }
}

fn database_commands(config: &TetherConfig) -> Result<DatabaseCommands> {
    let database = &config.database;
    Ok(DatabaseCommands {
        init: database.init.clone(),
        start: database
            .start
            .clone()
            .context("database.start is required on a database node")?,
        stop: database.stop.clone(),
        promote: database.promote.clone(),
        demote: database.demote.clone(),
        standalone: database.standalone.clone(),
        sync_check: database.sync_check.clone(),
    })
}

async fn diagnostics(local: &LocalState, controller: Option<&Arc<CommandController>>) {
    let running = match controller {
        Some(controller) => Some(controller.is_running().await),
        None => None,
    };
    match local.record() {
        Ok(record) => info!(
            role = %record.role,
            synced = record.synced,
            configured = %local.configured(),
            database_running = ?running,
            "status"
        ),
        Err(e) => warn!(error = %e, database_running = ?running, "status unavailable"),
    }
    info!(backtrace = %Backtrace::force_capture(), "diagnostics requested");
}
