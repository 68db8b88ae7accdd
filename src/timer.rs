use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Restartable, cancellable single-shot timer.
///
/// `start()` returns a future that resolves once the duration elapses. A
/// later `start()` or `cancel()` disarms every previously returned future,
/// which then never resolves. A timer without a duration never fires.
pub struct Timer {
    duration: Option<Duration>,
    generation: watch::Sender<u64>,
}

impl Timer {
    pub fn new(duration: Option<Duration>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            duration,
            generation,
        }
    }

    pub fn start(&self) -> impl Future<Output = ()> + Send + 'static {
        self.cancel();
        let mut armed = self.generation.subscribe();
        let duration = self.duration;

        async move {
            let Some(duration) = duration else {
                return std::future::pending().await;
            };
            if duration.is_zero() {
                if armed.has_changed().unwrap_or(true) {
                    std::future::pending::<()>().await;
                }
                return;
            }
            tokio::select! {
                biased;
                _ = armed.changed() => std::future::pending().await,
                _ = tokio::time::sleep(duration) => {}
            }
        }
    }

    pub fn cancel(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}
