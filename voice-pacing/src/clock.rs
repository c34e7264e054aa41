//! Wall-clock bookkeeping for one pacing stream (spec §4.4 steps 2, 3, 7).

use std::time::{Duration, Instant};

/// Tracks the mapping between a stream's presentation timestamps and the
/// wall clock, including time spent paused. Not `Clone`: owned by exactly
/// one pacing stream's run loop, mutated under the stream's `clock` lock.
#[derive(Debug)]
pub struct PacingClock {
    start_wall: Option<Instant>,
    start_pts_ms: f64,
    total_paused: Duration,
    pause_started_at: Option<Instant>,
}

impl PacingClock {
    pub fn new() -> Self {
        Self {
            start_wall: None,
            start_pts_ms: 0.0,
            total_paused: Duration::ZERO,
            pause_started_at: None,
        }
    }

    /// Latches `startWall`/`startPts` on the first forwarded packet only
    /// (spec §4.4 step 2).
    pub fn latch_start(&mut self, now: Instant, pts_ms: f64) {
        if self.start_wall.is_none() {
            self.start_wall = Some(now);
            self.start_pts_ms = pts_ms;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_started_at.is_some()
    }

    pub fn pause(&mut self, now: Instant) {
        if self.pause_started_at.is_none() {
            self.pause_started_at = Some(now);
        }
    }

    /// Accumulates the just-ended pause interval into `totalPausedDuration`
    /// (spec §4.4 step 3).
    pub fn resume(&mut self, now: Instant) {
        if let Some(started) = self.pause_started_at.take() {
            self.total_paused += now.saturating_duration_since(started);
        }
    }

    /// `max(0, (this.pts − startPts) − (now() − startWall − totalPausedDuration))`
    /// (spec §4.4 step 7).
    pub fn sleep_duration(&self, now: Instant, pts_ms: f64) -> Duration {
        let start_wall = match self.start_wall {
            Some(w) => w,
            None => return Duration::ZERO,
        };
        let elapsed_pts_ms = pts_ms - self.start_pts_ms;
        let elapsed_wall_ms = now.saturating_duration_since(start_wall).as_secs_f64() * 1000.0
            - self.total_paused.as_secs_f64() * 1000.0;
        let target_ms = elapsed_pts_ms - elapsed_wall_ms;
        if target_ms <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(target_ms / 1000.0)
        }
    }
}

impl Default for PacingClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_latch_sets_origin_and_later_calls_are_no_ops() {
        let mut clock = PacingClock::new();
        let t0 = Instant::now();
        clock.latch_start(t0, 100.0);
        clock.latch_start(t0 + Duration::from_millis(500), 999.0);
        assert_eq!(clock.sleep_duration(t0, 100.0), Duration::ZERO);
    }

    #[test]
    fn sleep_duration_matches_pts_minus_elapsed_wall() {
        let mut clock = PacingClock::new();
        let t0 = Instant::now();
        clock.latch_start(t0, 0.0);
        // 40ms of pts has elapsed but only 10ms of wall time: sleep ~30ms.
        let now = t0 + Duration::from_millis(10);
        let sleep = clock.sleep_duration(now, 40.0);
        assert!((sleep.as_secs_f64() * 1000.0 - 30.0).abs() < 1.0);
    }

    #[test]
    fn paused_duration_is_excluded_from_elapsed_wall() {
        let mut clock = PacingClock::new();
        let t0 = Instant::now();
        clock.latch_start(t0, 0.0);
        clock.pause(t0 + Duration::from_millis(5));
        clock.resume(t0 + Duration::from_millis(205)); // paused 200ms
        let now = t0 + Duration::from_millis(210);
        // Wall elapsed minus pause = 10ms; pts target is 40ms, so ~30ms left.
        let sleep = clock.sleep_duration(now, 40.0);
        assert!((sleep.as_secs_f64() * 1000.0 - 30.0).abs() < 1.0);
    }
}
