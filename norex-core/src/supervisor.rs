//! Poll scheduler and intent handler
//!
//! The supervisor owns the periodic poll: one poll after the initial delay,
//! then one per interval. Polls and intents run in their own tasks, so a
//! hung status query never delays an intent, `Quit` or shutdown, and a slow
//! lifecycle command never delays the next poll. A tick that finds the
//! previous poll still running is skipped.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::audit::LogCategory;
use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::intent::Intent;

const INTENT_CAPACITY: usize = 32;

pub struct Supervisor;

impl Supervisor {
    /// Start polling and accepting intents. Must be called inside a runtime.
    pub fn spawn(bridge: Arc<Bridge>) -> SupervisorHandle {
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(bridge, intent_rx, shutdown_rx));
        SupervisorHandle {
            intents: intent_tx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

pub struct SupervisorHandle {
    intents: mpsc::Sender<Intent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Sender for presenters that need their own copy
    pub fn intents(&self) -> mpsc::Sender<Intent> {
        self.intents.clone()
    }

    /// Queue an intent; false once the supervisor has stopped
    pub async fn send(&self, intent: Intent) -> bool {
        self.intents.send(intent).await.is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the supervisor stops on its own (a `Quit` intent)
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "supervisor task failed");
        }
    }

    /// Stop polling, abort in-flight intents and wait for the loop to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.wait().await;
    }
}

async fn run(
    bridge: Arc<Bridge>,
    mut intents: mpsc::Receiver<Intent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(bridge.initial_poll_delay()) => {}
        _ = shutdown.changed() => return,
    }
    let mut in_flight = Some(spawn_poll(&bridge));

    let interval = bridge.poll_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tasks = JoinSet::new();
    info!(interval_ms = interval.as_millis() as u64, "supervisor started");

    let drain = loop {
        tokio::select! {
            _ = shutdown.changed() => break false,
            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|poll| !poll.is_finished()) {
                    debug!("previous poll still running, skipping tick");
                } else {
                    in_flight = Some(spawn_poll(&bridge));
                }
            }
            intent = intents.recv() => match intent {
                None | Some(Intent::Quit) => break true,
                Some(intent) => {
                    let bridge = bridge.clone();
                    tasks.spawn(async move { dispatch(&bridge, intent).await });
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "intent task failed");
                }
            }
        }
    };

    // a scheduled poll has nothing left to report once the loop is gone
    if let Some(poll) = in_flight {
        poll.abort();
    }
    if drain {
        while tasks.join_next().await.is_some() {}
    } else {
        tasks.shutdown().await;
    }
    info!("supervisor stopped");
}

fn spawn_poll(bridge: &Arc<Bridge>) -> JoinHandle<()> {
    let bridge = bridge.clone();
    tokio::spawn(async move {
        bridge.poller().poll().await;
    })
}

async fn dispatch(bridge: &Bridge, intent: Intent) {
    let name = intent.action_name();
    debug!(intent = %name, "handling intent");
    bridge.record_intent(&intent);

    let controller = bridge.controller();
    let outcome: Result<(), BridgeError> = match &intent {
        Intent::StartAll => {
            controller.start_all().await;
            Ok(())
        }
        Intent::StopAll => {
            controller.stop_all().await;
            Ok(())
        }
        Intent::RestartAll => {
            controller.restart_all().await;
            Ok(())
        }
        Intent::Start(id) => controller.start(id).await.map(drop),
        Intent::Stop(id) => controller.stop(id).await.map(drop),
        Intent::Restart(id) => controller.restart(id).await.map(drop),
        Intent::OpenFolder(folder) => bridge.open_path(folder).await.map(drop),
        Intent::Refresh => {
            bridge.poller().poll().await;
            Ok(())
        }
        Intent::Quit => Ok(()),
    };

    if let Err(e) = outcome {
        warn!(intent = %name, error = %e, "intent failed");
        bridge
            .audit()
            .record(LogCategory::Actions, format!("ERROR: {}: {}", name, e));
    }
}
