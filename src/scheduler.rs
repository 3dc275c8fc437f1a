//! Fixed-rate background loops.
//!
//! Used by the store health check and the search index refresh. A ticker waits one
//! full period before its first run, never overlaps runs, and delays (rather than
//! bursts) ticks missed while a run was in progress.

use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a spawned ticker. Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop to stop after the current run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(join) = self.join.take()
            && let Err(err) = join.await
            && err.is_panic()
        {
            warn!(task = self.name, "background task panicked before shutdown");
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn `tick` every `period` until the returned handle is cancelled or dropped.
pub fn spawn_ticker<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();

    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = name, period_ms = period.as_millis() as u64, "ticker started");

        loop {
            tokio::select! {
                biased;
                _ = child.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                biased;
                _ = child.cancelled() => break,
                _ = tick() => {}
            }
        }

        debug!(task = name, "ticker stopped");
    });

    TaskHandle {
        name,
        token,
        join: Some(join),
    }
}
