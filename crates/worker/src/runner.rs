use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use beacon_engine::dispatcher::Dispatcher;

/// Drives [`Dispatcher::run_cycle`] on a fixed interval.
///
/// Any number of these may run against the same database; the dispatcher's
/// conditional claim keeps them from delivering a job twice.
pub struct DispatchLoop {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl DispatchLoop {
    pub fn new(dispatcher: Arc<Dispatcher>, interval_ms: u64) -> Self {
        Self {
            dispatcher,
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Run cycles until `shutdown` resolves. A cycle in flight is allowed to
    /// finish before returning.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Dispatch loop started"
        );

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let report = self.dispatcher.run_cycle().await;
                    cycles += 1;
                    if report.selected == 0 {
                        tracing::trace!("No eligible jobs");
                    }
                }
            }
        }

        tracing::info!(cycles, "Dispatch loop stopped");
        cycles
    }
}
