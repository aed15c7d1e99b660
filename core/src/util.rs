use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tracing::debug;

/// Make a notifier that is fulfilled when SIGINT occurs.
pub fn notify_on_sigint() -> Arc<Notify> {
    let notify = Arc::new(Notify::new());

    tokio::spawn({
        let notify = Arc::clone(&notify);
        async move {
            loop {
                tokio::signal::ctrl_c().await.ok();
                debug!("keyboard interrupt");
                notify.notify_waiters();
            }
        }
    });

    notify
}

/// Exponential back-off schedule with jitter: 200ms → 400ms → 800ms → ...
/// Used by the actuator loop after a bus error.
pub fn backoff(attempt: u64) -> Duration {
    let base_delay_ms = 200u64 * (1u64 << (attempt.saturating_sub(1)).min(6));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}

/// Current wall-clock time as an ISO-8601 string, the timestamp format used
/// across message envelopes and execution records.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}
