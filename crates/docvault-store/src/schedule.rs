// ABOUTME: Cancellable fixed-interval background task used by the backup and health loops.
// ABOUTME: Stopping signals a watch channel and joins the task, letting an in-flight run finish.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `job` every `period`. With `run_immediately` the first run happens
    /// at once, otherwise after one full period. Runs never overlap; a slow
    /// run delays the following ticks instead of bunching them.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, run_immediately: bool, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !run_immediately {
                // The first tick of an interval completes immediately.
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::debug!("periodic task {} running", name);
                        job().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("periodic task {} stopped", name);
        });

        tracing::info!("started periodic task {} every {:?}", name, period);
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("periodic task {} ended abnormally: {}", self.name, e);
        }
    }
}
