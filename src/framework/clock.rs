//! Virtual-time clock shared by every peripheral that models a hardware
//! counter.
//!
//! Real counters are not ticked instruction-by-instruction: each access
//! reconciles the logical counter from elapsed nanoseconds, and a single
//! host timer is armed for whichever peripheral's next compare event is
//! nearest. [`VirtualClock`] tracks "now" and the set of armed deadlines;
//! [`Clocked`] is the callback contract a peripheral implements so the
//! clock knows when and whom to expire.
//!
//! This replaces the multi-clock-domain tick accounting of a cycle-stepped
//! CPU core with a single absolute nanosecond timeline, matching a
//! device model driven by a virtual clock rather than a fetch-decode loop.

/// A peripheral that arms a one-shot deadline against the virtual clock.
///
/// `deadline_ns` reports the next point in time (if any) at which the
/// peripheral needs to run its internal reconciliation even absent a
/// guest register access - e.g. a timer's compare match. `expire` performs
/// that reconciliation for the given timestamp.
pub trait Clocked {
    /// Next absolute deadline in nanoseconds this peripheral wants to be
    /// woken at, or `None` if nothing is armed.
    fn deadline_ns(&self) -> Option<i64>;

    /// Reconcile internal state up to `now_ns`. Called by the clock when
    /// `now_ns >= deadline_ns()`, and also safe to call early.
    fn expire(&mut self, now_ns: i64);
}

/// Tracks the current virtual time and drives armed [`Clocked`] peripherals.
///
/// There is no background thread: a driver (tests, or an embedding
/// application) advances time explicitly via [`VirtualClock::advance_to`],
/// which is the Rust-side analogue of a host timer callback firing.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualClock {
    now_ns: i64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { now_ns: 0 }
    }

    pub fn now_ns(&self) -> i64 {
        self.now_ns
    }

    /// Move the clock forward to `now_ns`, expiring any peripheral whose
    /// deadline has been reached, in deadline order. Peripherals are given
    /// as a slice of trait objects so a SoC can drive all of its clocked
    /// children from one call site.
    ///
    /// No-op (other than advancing `now_ns`) if `now_ns` is not ahead of
    /// the current time.
    pub fn advance_to(&mut self, now_ns: i64, clocked: &mut [&mut dyn Clocked]) {
        if now_ns <= self.now_ns {
            return;
        }

        loop {
            let next = clocked
                .iter()
                .enumerate()
                .filter_map(|(idx, c)| c.deadline_ns().map(|d| (idx, d)))
                .filter(|&(_, d)| d <= now_ns)
                .min_by_key(|&(_, d)| d);

            match next {
                Some((idx, deadline)) => clocked[idx].expire(deadline),
                None => break,
            }
        }

        self.now_ns = now_ns;
    }

    /// The earliest deadline across a set of clocked peripherals, if any
    /// are armed. A driver loop can use this to know how far it may
    /// advance before it must call [`VirtualClock::advance_to`] again.
    pub fn next_deadline(clocked: &[&dyn Clocked]) -> Option<i64> {
        clocked.iter().filter_map(|c| c.deadline_ns()).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        deadline: Option<i64>,
        fired_at: Vec<i64>,
    }

    impl Clocked for Probe {
        fn deadline_ns(&self) -> Option<i64> {
            self.deadline
        }

        fn expire(&mut self, now_ns: i64) {
            self.fired_at.push(now_ns);
            self.deadline = None;
        }
    }

    #[test]
    fn advance_without_deadline_just_moves_time() {
        let mut clock = VirtualClock::new();
        let mut p = Probe { deadline: None, fired_at: vec![] };
        clock.advance_to(1_000, &mut [&mut p]);
        assert_eq!(clock.now_ns(), 1_000);
        assert!(p.fired_at.is_empty());
    }

    #[test]
    fn advance_fires_reached_deadline() {
        let mut clock = VirtualClock::new();
        let mut p = Probe { deadline: Some(500), fired_at: vec![] };
        clock.advance_to(1_000, &mut [&mut p]);
        assert_eq!(p.fired_at, vec![500]);
        assert_eq!(clock.now_ns(), 1_000);
    }

    #[test]
    fn advance_does_not_fire_future_deadline() {
        let mut clock = VirtualClock::new();
        let mut p = Probe { deadline: Some(2_000), fired_at: vec![] };
        clock.advance_to(1_000, &mut [&mut p]);
        assert!(p.fired_at.is_empty());
    }

    #[test]
    fn advance_fires_multiple_in_deadline_order() {
        let mut clock = VirtualClock::new();
        let mut a = Probe { deadline: Some(300), fired_at: vec![] };
        let mut b = Probe { deadline: Some(100), fired_at: vec![] };
        clock.advance_to(1_000, &mut [&mut a, &mut b]);
        assert_eq!(a.fired_at, vec![300]);
        assert_eq!(b.fired_at, vec![100]);
    }

    #[test]
    fn rewinding_time_is_a_no_op() {
        let mut clock = VirtualClock::new();
        clock.advance_to(1_000, &mut []);
        clock.advance_to(500, &mut []);
        assert_eq!(clock.now_ns(), 1_000);
    }

    #[test]
    fn next_deadline_reports_earliest() {
        let a = Probe { deadline: Some(300), fired_at: vec![] };
        let b = Probe { deadline: Some(100), fired_at: vec![] };
        let c = Probe { deadline: None, fired_at: vec![] };
        let refs: Vec<&dyn Clocked> = vec![&a, &b, &c];
        assert_eq!(VirtualClock::next_deadline(&refs), Some(100));
    }
}
