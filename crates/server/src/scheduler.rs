use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

/// Starts `job` every `period` until `shutdown` flips to true.
///
/// Each tick runs on its own task, so a slow run never delays the clock;
/// an overlapping tick is turned away by the job's own reentrancy guard. The
/// handle resolves to the number of ticks that started a run.
pub fn spawn<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<usize>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    tokio::spawn(job());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "system.scheduler.stopped", job = name, ticks, "scheduler stopped");
        ticks
    })
}

/// Waits up to `grace` until `is_running` reports false.
pub async fn drain(is_running: impl Fn() -> bool, grace: Duration) -> bool {
    let deadline = time::Instant::now() + grace;
    while is_running() {
        if time::Instant::now() >= deadline {
            return false;
        }
        time::sleep(Duration::from_millis(50)).await;
    }
    true
}
