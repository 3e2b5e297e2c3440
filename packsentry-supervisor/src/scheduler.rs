//! Adaptive deadline scheduler for the three cooperative slots.
//!
//! Each slot carries a next-deadline timestamp against a monotonically
//! increasing millisecond clock. When the alert or external-input condition
//! flips, [`Scheduler::apply_rates`] re-reads the target periods; a slot
//! whose period shortened has its deadline pulled forward to
//! `min(current, now + new_period)`, while a slot whose period lengthened
//! keeps the deadline it already earned — rate changes may only ever make
//! the system more responsive, never skip work it had promised.

use crate::config::LoopTiming;

/// Convert a real-time window to a cycle count at the given period,
/// rounding up so the window is never silently shortened. Clamped to
/// `1..=u16::MAX`.
#[must_use]
pub fn ms_to_cycles(window_ms: u32, period_ms: u32) -> u16 {
    if period_ms == 0 {
        return 1;
    }
    let cycles = window_ms.div_ceil(period_ms);
    cycles.clamp(1, u32::from(u16::MAX)) as u16
}

/// The three slot deadlines plus their current periods.
#[derive(Debug, Clone)]
pub struct Scheduler {
    timing: LoopTiming,

    fast_period_ms: u32,
    med_period_ms: u32,
    slow_period_ms: u32,

    next_fast_ms: u64,
    next_med_ms: u64,
    next_slow_ms: u64,
}

impl Scheduler {
    /// Start at nominal rates with every slot due immediately.
    #[must_use]
    pub fn new(timing: LoopTiming, now_ms: u64) -> Self {
        Self {
            timing,
            fast_period_ms: timing.fast_normal_ms,
            med_period_ms: timing.med_normal_ms,
            slow_period_ms: timing.slow_normal_ms,
            next_fast_ms: now_ms,
            next_med_ms: now_ms,
            next_slow_ms: now_ms,
        }
    }

    /// Back to nominal rates, all slots due at `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        *self = Self::new(self.timing, now_ms);
    }

    /// Current medium period — the engine's cycle-count holds are scaled
    /// against this.
    #[must_use]
    pub fn med_period_ms(&self) -> u32 {
        self.med_period_ms
    }

    /// Current fast period.
    #[must_use]
    pub fn fast_period_ms(&self) -> u32 {
        self.fast_period_ms
    }

    /// Current slow period.
    #[must_use]
    pub fn slow_period_ms(&self) -> u32 {
        self.slow_period_ms
    }

    /// Re-read target periods for the current alert / external-input state
    /// and pull forward any deadline whose slot just got faster.
    pub fn apply_rates(&mut self, now_ms: u64, alert: bool, external_active: bool) {
        let (fast, med, mut slow) = if alert {
            (
                self.timing.fast_alert_ms,
                self.timing.med_alert_ms,
                self.timing.slow_alert_ms,
            )
        } else {
            (
                self.timing.fast_normal_ms,
                self.timing.med_normal_ms,
                self.timing.slow_normal_ms,
            )
        };
        if external_active && slow > self.timing.slow_external_ms {
            slow = self.timing.slow_external_ms;
        }

        self.fast_period_ms = fast;
        self.med_period_ms = med;
        self.slow_period_ms = slow;

        self.next_fast_ms = self.next_fast_ms.min(now_ms + u64::from(fast));
        self.next_med_ms = self.next_med_ms.min(now_ms + u64::from(med));
        self.next_slow_ms = self.next_slow_ms.min(now_ms + u64::from(slow));
    }

    /// Whether the fast slot's deadline has passed.
    #[must_use]
    pub fn fast_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_fast_ms
    }

    /// Whether the medium slot's deadline has passed.
    #[must_use]
    pub fn med_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_med_ms
    }

    /// Whether the slow slot's deadline has passed.
    #[must_use]
    pub fn slow_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_slow_ms
    }

    /// Schedule the fast slot's next run.
    pub fn rearm_fast(&mut self, now_ms: u64) {
        self.next_fast_ms = now_ms + u64::from(self.fast_period_ms);
    }

    /// Schedule the medium slot's next run.
    pub fn rearm_med(&mut self, now_ms: u64) {
        self.next_med_ms = now_ms + u64::from(self.med_period_ms);
    }

    /// Schedule the slow slot's next run.
    pub fn rearm_slow(&mut self, now_ms: u64) {
        self.next_slow_ms = now_ms + u64::from(self.slow_period_ms);
    }

    #[cfg(test)]
    fn deadlines(&self) -> (u64, u64, u64) {
        (self.next_fast_ms, self.next_med_ms, self.next_slow_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_to_cycles_rounds_up() {
        assert_eq!(ms_to_cycles(10_000, 500), 20);
        assert_eq!(ms_to_cycles(10_000, 100), 100);
        assert_eq!(ms_to_cycles(5_000, 500), 10);
        assert_eq!(ms_to_cycles(10_000, 300), 34); // 33.3 rounds up
        assert_eq!(ms_to_cycles(0, 500), 1);
        assert_eq!(ms_to_cycles(10_000, 0), 1);
        assert_eq!(ms_to_cycles(u32::MAX, 1), u16::MAX);
    }

    #[test]
    fn hold_window_stays_within_one_period_of_target() {
        // The CRITICAL hold must be 10 s ± one medium period at any rate
        for period in [100u32, 250, 500] {
            let cycles = u32::from(ms_to_cycles(10_000, period));
            let realized = cycles * period;
            assert!(realized >= 10_000, "period {period}: {realized} < window");
            assert!(
                realized < 10_000 + period,
                "period {period}: {realized} overshoots by a full period"
            );
        }
    }

    #[test]
    fn slots_start_due_and_rearm_by_period() {
        let mut sched = Scheduler::new(LoopTiming::default(), 0);
        assert!(sched.fast_due(0));
        assert!(sched.med_due(0));
        assert!(sched.slow_due(0));

        sched.rearm_fast(0);
        sched.rearm_med(0);
        sched.rearm_slow(0);
        assert!(!sched.fast_due(99));
        assert!(sched.fast_due(100));
        assert!(!sched.med_due(499));
        assert!(sched.med_due(500));
        assert!(!sched.slow_due(4999));
        assert!(sched.slow_due(5000));
    }

    #[test]
    fn alert_tightens_all_three_slots() {
        let mut sched = Scheduler::new(LoopTiming::default(), 0);
        sched.rearm_fast(0);
        sched.rearm_med(0);
        sched.rearm_slow(0);

        sched.apply_rates(10, true, false);
        assert_eq!(sched.fast_period_ms(), 20);
        assert_eq!(sched.med_period_ms(), 100);
        assert_eq!(sched.slow_period_ms(), 1000);

        // Deadlines pulled forward to now + new period
        let (fast, med, slow) = sched.deadlines();
        assert_eq!(fast, 30);
        assert_eq!(med, 110);
        assert_eq!(slow, 1010);
    }

    #[test]
    fn relaxing_keeps_earned_deadlines() {
        let mut sched = Scheduler::new(LoopTiming::default(), 0);
        sched.apply_rates(0, true, false);
        sched.rearm_med(0); // due at 100

        // Alert clears: the medium slot keeps its imminent deadline rather
        // than being pushed out to now + 500
        sched.apply_rates(50, false, false);
        assert_eq!(sched.med_period_ms(), 500);
        let (_, med, _) = sched.deadlines();
        assert_eq!(med, 100);
    }

    #[test]
    fn tightening_never_pushes_a_deadline_below_now_plus_period() {
        let mut sched = Scheduler::new(LoopTiming::default(), 0);
        sched.rearm_slow(0); // due at 5000
        sched.apply_rates(200, true, false);

        let (_, _, slow) = sched.deadlines();
        assert_eq!(slow, 1200); // now + new period, not earlier
        assert!(slow >= 200 + 1000);
    }

    #[test]
    fn external_input_tightens_only_the_slow_slot() {
        let mut sched = Scheduler::new(LoopTiming::default(), 0);
        sched.apply_rates(0, false, true);

        assert_eq!(sched.fast_period_ms(), 100);
        assert_eq!(sched.med_period_ms(), 500);
        assert_eq!(sched.slow_period_ms(), 1000);

        // Already-tighter alert rate is not loosened by the external rule
        sched.apply_rates(0, true, true);
        assert_eq!(sched.slow_period_ms(), 1000);
    }

    #[test]
    fn reset_returns_to_nominal() {
        let mut sched = Scheduler::new(LoopTiming::default(), 0);
        sched.apply_rates(0, true, true);
        sched.reset(2000);

        assert_eq!(sched.fast_period_ms(), 100);
        assert!(sched.fast_due(2000));
        assert!(sched.slow_due(2000));
    }
}
