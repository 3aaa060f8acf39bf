//! Throttled progress reporting for transfers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::utils::bytesize::humanbytes;

/// Pure admission decision for progress updates.
///
/// Admits at most one update per interval, and always admits a final
/// update regardless of the interval.
#[derive(Debug)]
pub struct ThrottleGate {
    interval: Duration,
    last_emit: Instant,
}

impl ThrottleGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: Instant::now(),
        }
    }

    /// Whether an update observed at `now` should be emitted.
    pub fn admit_at(&mut self, now: Instant, is_final: bool) -> bool {
        if is_final || now.duration_since(self.last_emit) >= self.interval {
            self.last_emit = now;
            true
        } else {
            false
        }
    }
}

/// Cloneable progress reporter shared with the transfer layer.
///
/// `update` may be called at arbitrary frequency; emission is bounded
/// by the gate. A disabled meter swallows every update.
#[derive(Clone)]
pub struct ProgressMeter {
    inner: Option<Arc<Meter>>,
}

struct Meter {
    action: String,
    label: String,
    gate: Mutex<ThrottleGate>,
}

impl ProgressMeter {
    pub fn new(action: impl Into<String>, label: impl Into<String>, interval: Duration) -> Self {
        Self {
            inner: Some(Arc::new(Meter {
                action: action.into(),
                label: label.into(),
                gate: Mutex::new(ThrottleGate::new(interval)),
            })),
        }
    }

    /// A meter that reports nothing.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Report transfer position in bytes.
    pub fn update(&self, current: u64, total: u64) {
        let Some(meter) = &self.inner else {
            return;
        };
        let is_final = current == total;
        if !meter.gate.lock().admit_at(Instant::now(), is_final) {
            return;
        }
        let pct = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        info!(
            "{:<12} | {:<30} | {:>10}/{:<10} ({:5.1}%)",
            meter.action,
            meter.label,
            humanbytes(current),
            humanbytes(total),
            pct
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn gate_blocks_until_interval_elapses() {
        let mut gate = ThrottleGate::new(Duration::from_secs(15));
        assert!(!gate.admit_at(Instant::now(), false));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!gate.admit_at(Instant::now(), false));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(gate.admit_at(Instant::now(), false));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_rearms_after_emission() {
        let mut gate = ThrottleGate::new(Duration::from_secs(15));
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(gate.admit_at(Instant::now(), false));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!gate.admit_at(Instant::now(), false));

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(gate.admit_at(Instant::now(), false));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_always_admits_final_update() {
        let mut gate = ThrottleGate::new(Duration::from_secs(15));
        assert!(gate.admit_at(Instant::now(), true));
        // Even right after an emission.
        assert!(gate.admit_at(Instant::now(), true));
    }

    #[tokio::test(start_paused = true)]
    async fn meter_survives_rapid_updates() {
        let meter = ProgressMeter::new("Downloading", "movie.mp4", Duration::from_secs(15));
        for i in 0..1000u64 {
            meter.update(i, 2000);
        }
        meter.update(2000, 2000);
    }

    #[test]
    fn disabled_meter_is_silent() {
        let meter = ProgressMeter::disabled();
        meter.update(0, 0);
        meter.update(512, 1024);
    }
}
