//! TIMER peripheral: a virtual-clock-driven free-running counter with four
//! compare/capture registers, shortcuts and an interrupt output.
//!
//! The counter is never ticked instruction-by-instruction. Every register
//! access reconciles the stored counter from elapsed nanoseconds first,
//! and a host-side deadline is armed for whichever compare register is
//! nearest so [`crate::framework::VirtualClock::advance_to`] can expire it
//! even without an intervening access.
use log::warn;
use serde::{Deserialize, Serialize};

use crate::framework::{Clocked, IrqLine};

const REF_FREQ_HZ: u64 = 64_000_000;
const NUM_CC: usize = 4;

/// `BITMODE` is not the monotonic 0..3 one might expect: it is a direct
/// encoding inherited from the nRF52840 hardware.
const BITWIDTHS: [u32; 4] = [16, 8, 24, 32];

const TASK_START: u32 = 0x000;
const TASK_STOP_OR_COUNT: u32 = 0x008;
const TASK_CLEAR: u32 = 0x00C;
const TASK_CAPTURE_BASE: u32 = 0x040;
const TASK_CAPTURE_END: u32 = 0x050;
const EVENT_COMPARE_BASE: u32 = 0x140;
const EVENT_COMPARE_END: u32 = 0x150;
const REG_SHORTS: u32 = 0x200;
const REG_INTENSET: u32 = 0x304;
const REG_INTENCLR: u32 = 0x308;
const REG_MODE: u32 = 0x504;
const REG_BITMODE: u32 = 0x508;
const REG_PRESCALER: u32 = 0x510;
const CC_BASE: u32 = 0x540;
const CC_END: u32 = 0x550;

const SHORTS_MASK: u32 = 0x0F0F;
const INTEN_MASK: u32 = 0x000F_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Timer,
    Counter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimerConfig {
    pub id: u8,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { id: 0 }
    }
}

/// Schema version 1, matching the per-component migration contract.
pub const TIMER_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerState {
    pub version: u32,
    pub counter: u32,
    pub running: bool,
    pub last_reconcile_ns: i64,
    pub cc: [u32; NUM_CC],
    pub events_compare: [bool; NUM_CC],
    pub shorts: u32,
    pub inten: u32,
    pub mode: Mode,
    pub bitmode: u8,
    pub prescaler: u8,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            version: TIMER_SCHEMA_VERSION,
            counter: 0,
            running: false,
            last_reconcile_ns: 0,
            cc: [0; NUM_CC],
            events_compare: [false; NUM_CC],
            shorts: 0,
            inten: 0,
            mode: Mode::Timer,
            bitmode: 0,
            prescaler: 0,
        }
    }
}

#[derive(Debug)]
pub struct Timer {
    config: TimerConfig,
    state: TimerState,
    irq: IrqLine,
    deadline_ns: Option<i64>,
}

impl Timer {
    pub fn new(config: TimerConfig) -> Self {
        Self { config, state: TimerState::default(), irq: IrqLine::new(), deadline_ns: None }
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn save_state(&self) -> TimerState {
        self.state.clone()
    }

    /// Restores a saved state and, if it was running, rearms against the
    /// restored `last_reconcile_ns` anchor - the post-load reconciliation
    /// hook, given this peripheral has no owning clock to ask "now" of.
    pub fn load_state(&mut self, state: TimerState) {
        let running = state.running;
        let anchor = state.last_reconcile_ns;
        self.state = state;
        self.irq.set(false);
        self.update_irq();
        if running {
            self.rearm(anchor);
        } else {
            self.deadline_ns = None;
        }
    }

    fn bitwidth(&self) -> u32 {
        BITWIDTHS[(self.state.bitmode & 0x3) as usize]
    }

    fn modulus(&self) -> u64 {
        1u64 << self.bitwidth()
    }

    fn freq_hz(&self) -> u64 {
        REF_FREQ_HZ >> self.state.prescaler.min(9)
    }

    fn ns_to_ticks(&self, delta_ns: i64) -> u64 {
        if delta_ns <= 0 {
            return 0;
        }
        ((delta_ns as u128 * self.freq_hz() as u128) / 1_000_000_000u128) as u64
    }

    /// Rounds up so that reconciling at the returned deadline always
    /// observes at least `ticks` elapsed - `ns_to_ticks` floors, so a
    /// truncated deadline here could otherwise make a one-tick rearm
    /// reconcile to zero ticks and never make progress.
    fn ticks_to_ns(&self, ticks: u64) -> i64 {
        let freq = self.freq_hz() as u128;
        let numerator = ticks as u128 * 1_000_000_000u128;
        ((numerator + freq - 1) / freq) as i64
    }

    /// Reconcile the counter up to `now_ns`, setting compare events and
    /// applying shortcuts for every CC crossed in the process.
    fn reconcile(&mut self, now_ns: i64) {
        let delta = now_ns - self.state.last_reconcile_ns;
        let ticks = self.ns_to_ticks(delta);
        let modulus = self.modulus();

        let mut distances = [0u64; NUM_CC];
        for i in 0..NUM_CC {
            distances[i] = (self.state.cc[i] as u64 + modulus - (self.state.counter as u64 % modulus)) % modulus;
        }

        self.state.counter = (((self.state.counter as u64) + ticks) % modulus) as u32;
        self.state.last_reconcile_ns = now_ns;

        let mut stop_requested = false;
        for i in 0..NUM_CC {
            if distances[i] <= ticks {
                self.state.events_compare[i] = true;
                if self.state.shorts & (1 << i) != 0 {
                    self.state.counter = 0;
                    self.state.last_reconcile_ns = now_ns;
                }
                if self.state.shorts & (1 << (i + 8)) != 0 {
                    stop_requested = true;
                }
            }
        }

        if stop_requested {
            self.state.running = false;
        }

        self.update_irq();
        self.rearm(now_ns);
    }

    fn update_irq(&mut self) {
        let asserted = (0..NUM_CC).any(|i| self.state.events_compare[i] && self.state.inten & (1 << (16 + i)) != 0);
        self.irq.set(asserted);
    }

    fn rearm(&mut self, now_ns: i64) {
        if !self.state.running {
            self.deadline_ns = None;
            return;
        }

        let modulus = self.modulus();
        let min_ticks = (0..NUM_CC)
            .filter(|&i| !self.state.events_compare[i])
            .map(|i| {
                let counter = self.state.counter as u64;
                let cc = self.state.cc[i] as u64;
                ((cc + modulus - counter - 1) % modulus) + 1
            })
            .min();

        self.deadline_ns = min_ticks.map(|ticks| now_ns + self.ticks_to_ns(ticks));
    }

    fn stop(&mut self) {
        self.state.running = false;
        self.deadline_ns = None;
    }

    /// TASK_COUNT increments the counter directly in counter mode, bypassing
    /// the elapsed-time reconciliation path entirely.
    fn task_count(&mut self) {
        let modulus = self.modulus();
        let distances: Vec<u64> = (0..NUM_CC)
            .map(|i| (self.state.cc[i] as u64 + modulus - (self.state.counter as u64 % modulus)) % modulus)
            .collect();
        self.state.counter = (((self.state.counter as u64) + 1) % modulus) as u32;
        for (i, d) in distances.iter().enumerate() {
            if *d == 1 {
                self.state.events_compare[i] = true;
            }
        }
        self.update_irq();
    }
}

impl Clocked for Timer {
    fn deadline_ns(&self) -> Option<i64> {
        self.deadline_ns
    }

    fn expire(&mut self, now_ns: i64) {
        self.reconcile(now_ns);
    }
}

impl Timer {
    /// No offset in this register map needs to know the current time to
    /// answer a read - reconciliation is only ever forced by a task write
    /// or capture, never by a plain register read.
    pub fn read(&mut self, offset: u32, size: u8) -> u64 {
        if size != 4 || offset % 4 != 0 {
            warn!("timer{}: misaligned or short read at {offset:#x}", self.config.id);
            return 0;
        }

        match offset {
            EVENT_COMPARE_BASE..EVENT_COMPARE_END => {
                let i = ((offset - EVENT_COMPARE_BASE) / 4) as usize;
                self.state.events_compare[i] as u64
            }
            REG_SHORTS => self.state.shorts as u64,
            REG_INTENSET | REG_INTENCLR => self.state.inten as u64,
            REG_MODE => match self.state.mode {
                Mode::Timer => 0,
                Mode::Counter => 1,
            },
            REG_BITMODE => self.state.bitmode as u64,
            REG_PRESCALER => self.state.prescaler as u64,
            CC_BASE..CC_END => {
                let i = ((offset - CC_BASE) / 4) as usize;
                self.state.cc[i] as u64
            }
            _ => {
                warn!("timer{}: read from unknown offset {offset:#x}", self.config.id);
                0
            }
        }
    }

    /// `now_ns` is the true current virtual time, supplied by the caller
    /// (the owning SoC's clock) rather than derived from this peripheral's
    /// own stale bookkeeping - every task or register write that reconciles
    /// or rearms uses it directly.
    pub fn write(&mut self, offset: u32, size: u8, value: u64, now_ns: i64) {
        if size != 4 || offset % 4 != 0 {
            warn!("timer{}: misaligned or short write at {offset:#x}", self.config.id);
            return;
        }
        let value = value as u32;

        match offset {
            TASK_START => {
                if value == 1 && self.state.mode == Mode::Timer && !self.state.running {
                    self.state.running = true;
                    self.rearm(now_ns);
                }
            }
            TASK_STOP_OR_COUNT => {
                if value == 1 {
                    match self.state.mode {
                        Mode::Counter => self.task_count(),
                        Mode::Timer => self.stop(),
                    }
                }
            }
            TASK_CLEAR => {
                if value == 1 {
                    self.state.counter = 0;
                    self.state.last_reconcile_ns = now_ns;
                    if self.state.running {
                        self.rearm(now_ns);
                    }
                }
            }
            TASK_CAPTURE_BASE..TASK_CAPTURE_END => {
                let i = ((offset - TASK_CAPTURE_BASE) / 4) as usize;
                if value == 1 {
                    self.reconcile(now_ns);
                    self.state.cc[i] = self.state.counter;
                }
            }
            EVENT_COMPARE_BASE..EVENT_COMPARE_END => {
                let i = ((offset - EVENT_COMPARE_BASE) / 4) as usize;
                if value == 0 {
                    self.state.events_compare[i] = false;
                    if self.state.running {
                        self.reconcile(now_ns);
                    } else {
                        self.update_irq();
                    }
                }
            }
            REG_SHORTS => self.state.shorts = value & SHORTS_MASK,
            REG_INTENSET => {
                self.state.inten |= value & INTEN_MASK;
                self.update_irq();
            }
            REG_INTENCLR => {
                self.state.inten &= !(value & INTEN_MASK);
                self.update_irq();
            }
            REG_MODE => {
                self.state.mode = if value & 1 == 1 { Mode::Counter } else { Mode::Timer };
            }
            REG_BITMODE => {
                if self.state.running {
                    warn!("timer{}: BITMODE changed while running", self.config.id);
                }
                self.state.bitmode = (value & 0x3) as u8;
            }
            REG_PRESCALER => {
                if self.state.running && self.state.mode == Mode::Timer {
                    warn!("timer{}: PRESCALER changed while running", self.config.id);
                }
                self.state.prescaler = (value & 0xF).min(9) as u8;
            }
            CC_BASE..CC_END => {
                let i = ((offset - CC_BASE) / 4) as usize;
                let modulus = self.modulus();
                self.state.cc[i] = (value as u64 % modulus) as u32;
                if self.state.running {
                    self.reconcile(now_ns);
                }
            }
            _ => {
                warn!("timer{}: write to unknown offset {offset:#x}", self.config.id);
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = TimerState::default();
        self.deadline_ns = None;
        self.irq.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::VirtualClock;

    fn started_timer(prescaler: u8, bitmode: u8, cc_index: usize, cc_value: u32, shorts: u32) -> Timer {
        let mut t = Timer::new(TimerConfig { id: 0 });
        t.write(REG_PRESCALER, 4, prescaler as u64, 0);
        t.write(REG_BITMODE, 4, bitmode as u64, 0);
        t.write(CC_BASE + cc_index as u32 * 4, 4, cc_value as u64, 0);
        t.write(REG_SHORTS, 4, shorts as u64, 0);
        t.write(REG_INTENSET, 4, 0x1_0000, 0);
        t.write(TASK_START, 4, 1, 0);
        t
    }

    /// Drives `t` the way [`crate::framework::VirtualClock::advance_to`]
    /// does in production: repeatedly expiring to the nearest still-due
    /// deadline, so a shortcut that rearms mid-interval is observed in the
    /// same hops a real caller would see, not skipped over in one jump.
    fn advance(t: &mut Timer, now_ns: i64) {
        let mut clock = VirtualClock::new();
        let mut clocked: [&mut dyn Clocked; 1] = [t];
        clock.advance_to(now_ns, &mut clocked);
    }

    #[test]
    fn one_shot_fires_compare_and_irq() {
        let mut t = started_timer(4, 3, 0, 4000, 0);
        // freq = 64MHz >> 4 = 4MHz; 4000 ticks = 1ms.
        advance(&mut t, 1_000_000);
        assert_eq!(t.read(EVENT_COMPARE_BASE, 4), 1);
        assert!(t.irq().is_asserted());
    }

    #[test]
    fn shortcut_clears_counter_on_match() {
        // SHORTS bit 1 = COMPARE1_CLEAR. 80 and 120 are multiples of 8 so
        // they convert to a whole number of nanoseconds at 64MHz (125/8 ns
        // per tick), keeping the assertion exact instead of fighting
        // virtual-clock rounding.
        let mut t = started_timer(0, 3, 1, 80, 0x2);
        let deadline = 120 * 1_000_000_000 / 64_000_000;
        advance(&mut t, deadline);
        // The shortcut crossing at tick 80 is the only due deadline before
        // `deadline`; nothing else is armed to carry the counter the rest
        // of the way, so force the same catch-up an access would trigger.
        t.expire(deadline);
        assert_eq!(t.state().counter, 40);
        assert!(t.state().events_compare[1]);
    }

    #[test]
    fn shortcut_stops_on_match() {
        // SHORTS bit 10 = COMPARE2_STOP.
        let mut t = started_timer(0, 3, 2, 1000, 0x400);
        let deadline = 2000 * 1_000_000_000 / 64_000_000;
        advance(&mut t, deadline);
        assert!(!t.state().running);
        assert!(t.deadline_ns().is_none());
    }

    #[test]
    fn clearing_counter_resets_to_zero() {
        let mut t = Timer::new(TimerConfig { id: 0 });
        t.reconcile_for_test(123, 0);
        t.write(TASK_CLEAR, 4, 1, 0);
        assert_eq!(t.state().counter, 0);
    }

    #[test]
    fn writing_event_then_clearing_then_reading_returns_zero() {
        let mut t = Timer::new(TimerConfig { id: 0 });
        t.state.events_compare[0] = true;
        t.write(EVENT_COMPARE_BASE, 4, 0, 0);
        assert_eq!(t.read(EVENT_COMPARE_BASE, 4), 0);
    }

    #[test]
    fn cc_write_stores_modulo_bitwidth() {
        let mut t = Timer::new(TimerConfig { id: 0 });
        t.write(REG_BITMODE, 4, 1, 0); // 8-bit
        t.write(CC_BASE, 4, 300, 0);
        assert_eq!(t.read(CC_BASE, 4), 300 % 256);
    }

    #[test]
    fn two_stops_are_equivalent_to_one() {
        let mut t = started_timer(0, 3, 0, 100, 0);
        t.write(TASK_STOP_OR_COUNT, 4, 1, 0);
        t.write(TASK_STOP_OR_COUNT, 4, 1, 0);
        assert!(!t.state().running);
    }

    #[test]
    fn capture_reconciles_against_the_real_elapsed_time() {
        // PRESCALER=0, BITMODE=3 (32-bit), CC1 far away so nothing is
        // armed to drive the counter on its own - the only way CC1 picks
        // up the elapsed time is if TASK_CAPTURE_1 is handed the true
        // current time instead of reusing its own last-reconciled anchor.
        let mut t = started_timer(0, 3, 1, 1_000_000, 0);
        let now_ns = 500;
        t.write(TASK_CAPTURE_BASE + 4, 4, 1, now_ns);
        let expected_ticks = (now_ns as u128 * 64_000_000u128 / 1_000_000_000u128) as u32;
        assert_eq!(t.state().cc[1], expected_ticks);
        assert_ne!(expected_ticks, 0);
    }

    #[test]
    fn save_restore_round_trips_observable_state() {
        let mut t = started_timer(4, 3, 0, 4000, 0);
        advance(&mut t, 1_500_000); // past the CC0 match, deadline rearmed beyond it.

        let saved = t.save_state();
        let mut restored = Timer::new(TimerConfig { id: 0 });
        restored.load_state(saved);

        assert_eq!(restored.state().counter, t.state().counter);
        assert_eq!(restored.state().cc, t.state().cc);
        assert_eq!(restored.deadline_ns(), t.deadline_ns());
    }

    #[test]
    fn counter_stays_within_bitwidth() {
        let mut t = Timer::new(TimerConfig { id: 0 });
        t.write(REG_BITMODE, 4, 1, 0); // 8-bit
        t.write(REG_PRESCALER, 4, 0, 0);
        t.write(TASK_START, 4, 1, 0);
        t.expire(1_000_000_000); // plenty of ticks to wrap several times
        assert!((t.state().counter as u64) < 256);
    }

    #[test]
    fn task_count_increments_in_counter_mode() {
        let mut t = Timer::new(TimerConfig { id: 0 });
        t.write(REG_MODE, 4, 1, 0);
        t.write(TASK_STOP_OR_COUNT, 4, 1, 0);
        t.write(TASK_STOP_OR_COUNT, 4, 1, 0);
        assert_eq!(t.state().counter, 2);
    }

    impl Timer {
        fn reconcile_for_test(&mut self, counter: u32, now_ns: i64) {
            self.state.counter = counter;
            self.state.last_reconcile_ns = now_ns;
        }
    }
}
