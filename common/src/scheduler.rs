pub fn interval_elapsed(last_attempt_ms: u64, interval_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(last_attempt_ms) >= interval_ms
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub last_attempt_ms: Option<u64>,
    pub active_interval_ms: u64,
}

/// Two-level upload pacing: the normal interval after a success, the short one after a failure.
#[derive(Debug, Clone)]
pub struct UploadScheduler {
    normal_interval_ms: u64,
    short_interval_ms: u64,
    state: ScheduleState,
}

impl UploadScheduler {
    pub fn new(normal_interval_ms: u64, short_interval_ms: u64) -> Self {
        Self {
            normal_interval_ms,
            short_interval_ms,
            state: ScheduleState {
                last_attempt_ms: None,
                active_interval_ms: normal_interval_ms,
            },
        }
    }

    /// Fires at most once per elapsed interval and re-arms itself when it does.
    pub fn due(&mut self, now_ms: u64) -> bool {
        let fire = match self.state.last_attempt_ms {
            None => true,
            Some(last) => interval_elapsed(last, self.state.active_interval_ms, now_ms),
        };

        if fire {
            self.state.last_attempt_ms = Some(now_ms);
        }
        fire
    }

    pub fn record_outcome(&mut self, succeeded: bool) {
        self.state.active_interval_ms = if succeeded {
            self.normal_interval_ms
        } else {
            self.short_interval_ms
        };
    }

    /// Starts a fresh session: the next `due` fires immediately on the normal interval.
    pub fn reset(&mut self) {
        self.state = ScheduleState {
            last_attempt_ms: None,
            active_interval_ms: self.normal_interval_ms,
        };
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        self.state
            .last_attempt_ms
            .map(|last| last.saturating_add(self.state.active_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_fires_immediately() {
        let mut scheduler = UploadScheduler::new(300_000, 60_000);
        assert!(scheduler.due(5));
        assert_eq!(scheduler.state().active_interval_ms, 300_000);
    }

    #[test]
    fn fires_once_per_window() {
        let mut scheduler = UploadScheduler::new(1_000, 200);
        assert!(scheduler.due(0));

        for now in [1, 500, 999] {
            assert!(!scheduler.due(now), "fired early at {now}");
        }
        assert!(scheduler.due(1_000));
        assert!(!scheduler.due(1_000));
        assert!(!scheduler.due(1_999));
        assert!(scheduler.due(2_000));
    }

    #[test]
    fn window_restarts_from_late_attempt() {
        let mut scheduler = UploadScheduler::new(1_000, 200);
        assert!(scheduler.due(0));
        assert!(scheduler.due(1_750));

        assert!(!scheduler.due(2_500));
        assert!(scheduler.due(2_750));
    }

    #[test]
    fn failure_switches_to_short_interval() {
        let mut scheduler = UploadScheduler::new(1_000, 200);
        assert!(scheduler.due(0));
        scheduler.record_outcome(false);

        assert_eq!(scheduler.next_due_ms(), Some(200));
        assert!(!scheduler.due(199));
        assert!(scheduler.due(200));

        scheduler.record_outcome(true);
        assert_eq!(scheduler.next_due_ms(), Some(1_200));
    }

    #[test]
    fn reset_restores_normal_interval() {
        let mut scheduler = UploadScheduler::new(1_000, 200);
        assert!(scheduler.due(0));
        scheduler.record_outcome(false);

        scheduler.reset();
        assert_eq!(scheduler.state().active_interval_ms, 1_000);
        assert!(scheduler.due(1));
    }

    #[test]
    fn clock_going_backwards_does_not_fire() {
        assert!(!interval_elapsed(5_000, 1_000, 4_000));
        assert!(interval_elapsed(5_000, 1_000, 6_000));
    }
}
