//! Resend (UDP, C6) and ping/pong keepalive (C5, §9) schedulers, built on
//! `tokio::time`. Re-imagined from the teacher's `Timeouts<Sv>`/`TimeoutKind`
//! (referenced by the teacher's own `demos/timeouts.rs` but absent from the
//! retrieved source tree) as a pair of interval-driven tasks rather than a
//! generic timeout-request queue, since Tempest only ever needs these two
//! fixed, periodic jobs per connection.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

/// Spawns a task that calls `tick` every `period`, stopping once `tick`
/// returns `false` or the returned [`tokio::task::JoinHandle`] is aborted.
/// Used for both the ping scheduler (spec §4.5) and the UDP resend
/// scheduler (spec §4.6); ticks that land late (e.g. the task was starved)
/// are coalesced rather than fired back-to-back.
pub fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        let mut iv = interval(period);
        iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            iv.tick().await;
            if !tick().await {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn spawn_periodic_ticks_until_false() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let handle = spawn_periodic(Duration::from_millis(10), move || {
            let count2 = count2.clone();
            async move {
                let n = count2.fetch_add(1, Ordering::SeqCst) + 1;
                n < 3
            }
        });

        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        handle.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
