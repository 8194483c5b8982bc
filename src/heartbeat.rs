//! Data-recency liveness check for a connected stream.
//!
//! A device can keep the TCP connection open while the firmware behind it has
//! stopped producing telemetry. Nothing on the wire says so, so the only signal
//! is how long it has been since the last decoded frame.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

#[derive(Debug)]
pub struct Heartbeat {
    last_data: Instant,
    timeout: Duration,
    poll: Interval,
}

impl Heartbeat {
    /// Starts the clock now. The first check happens one `poll_interval` from now.
    pub fn start(timeout: Duration, poll_interval: Duration) -> Self {
        let now = Instant::now();
        let mut poll = interval_at(now + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            last_data: now,
            timeout,
            poll,
        }
    }

    /// Records that data just arrived
    pub fn touch(&mut self) {
        self.last_data = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.last_data.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.timeout
    }

    /// Resolves on the first poll tick at which the stream has been quiet for longer than the
    /// timeout, yielding how long it has been quiet. Cancel safe.
    pub async fn expired(&mut self) -> Duration {
        loop {
            self.poll.tick().await;
            if self.is_expired() {
                return self.elapsed();
            }
        }
    }
}
