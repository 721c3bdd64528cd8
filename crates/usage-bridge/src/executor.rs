//! Start/stop lifecycle for long-running components
//!
//! [`execute`] starts an [`Executable`] on a background task and stops it
//! once the shutdown future resolves. Outcomes are reported as
//! [`LifecycleEvent`]s so the caller decides what a failure means.

use async_trait::async_trait;
use std::{future::Future, sync::Arc};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::{JoinError, JoinHandle},
};
use tracing::debug;

#[async_trait]
pub trait Executable: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub enum LifecycleEvent {
    StartSuccess,
    StartFailure(anyhow::Error),
    StopSuccess,
    StopFailure(anyhow::Error),
}

/// Handle to a running [`execute`] call
pub struct Execution {
    events: UnboundedReceiver<LifecycleEvent>,
    handle: JoinHandle<()>,
}

impl Execution {
    /// Next lifecycle event, `None` once the lifecycle is over.
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.events.recv().await
    }

    /// Wait until the executable has been stopped.
    pub async fn finished(self) -> Result<(), JoinError> {
        self.handle.await
    }
}

/// Start `executable`, then stop it exactly once when `shutdown` resolves.
///
/// `start` runs on the spawned task after one yield, so no event is emitted
/// before the caller holds the returned [`Execution`]. `stop` is called
/// whether or not `start` succeeded.
pub fn execute<F>(executable: Arc<dyn Executable>, shutdown: F) -> Execution
where
    F: Future<Output = ()> + Send + 'static,
{
    let (tx, events) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(executable, shutdown, tx));
    Execution { events, handle }
}

async fn run<F>(executable: Arc<dyn Executable>, shutdown: F, tx: UnboundedSender<LifecycleEvent>)
where
    F: Future<Output = ()> + Send,
{
    tokio::task::yield_now().await;

    let started = match executable.start().await {
        Ok(()) => LifecycleEvent::StartSuccess,
        Err(e) => LifecycleEvent::StartFailure(e),
    };
    // Nobody listening is fine, the lifecycle still runs to completion
    let _ = tx.send(started);

    shutdown.await;
    debug!("Shutdown requested, stopping");

    let stopped = match executable.stop().await {
        Ok(()) => LifecycleEvent::StopSuccess,
        Err(e) => LifecycleEvent::StopFailure(e),
    };
    let _ = tx.send(stopped);
}
