//! RTC peripheral: a 32,768 Hz free-running 24-bit counter with four
//! compare registers and an interrupt output.
//!
//! Structurally identical to [`crate::peripherals::timer::Timer`]'s
//! reconcile/rearm pair, but with a fixed bit width and no mode, bitmode,
//! shortcuts or capture tasks. Reading the counter register forces a
//! reconciliation first, so two reads in a row without an intervening
//! reset of the virtual clock are never stale relative to each other.
use log::warn;
use serde::{Deserialize, Serialize};

use crate::framework::{Clocked, IrqLine};

const REF_FREQ_HZ: u64 = 32_768;
const COUNTER_BITWIDTH: u32 = 24;
const COUNTER_MODULUS: u64 = 1 << COUNTER_BITWIDTH;
const NUM_CC: usize = 4;

const TASK_START: u32 = 0x000;
const TASK_STOP: u32 = 0x004;
const TASK_CLEAR: u32 = 0x008;
const TASK_TRIGOVRFLW: u32 = 0x00C;
const EVENT_TICK: u32 = 0x100;
const EVENT_OVRFLW: u32 = 0x104;
const EVENT_COMPARE_BASE: u32 = 0x140;
const EVENT_COMPARE_END: u32 = 0x150;
const REG_INTENSET: u32 = 0x304;
const REG_INTENCLR: u32 = 0x308;
const REG_COUNTER: u32 = 0x504;
const REG_PRESCALER: u32 = 0x508;
const CC_BASE: u32 = 0x540;
const CC_END: u32 = 0x550;

const INTEN_MASK: u32 = 0xF0003;
const PRESCALER_MASK: u32 = 0xFFF;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RtcConfig {
    pub id: u8,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self { id: 0 }
    }
}

pub const RTC_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcState {
    pub version: u32,
    pub counter: u32,
    pub running: bool,
    pub last_reconcile_ns: i64,
    pub cc: [u32; NUM_CC],
    pub events_compare: [bool; NUM_CC],
    pub inten: u32,
    pub prescaler: u32,
}

impl Default for RtcState {
    fn default() -> Self {
        Self {
            version: RTC_SCHEMA_VERSION,
            counter: 0,
            running: false,
            last_reconcile_ns: 0,
            cc: [0; NUM_CC],
            events_compare: [false; NUM_CC],
            inten: 0,
            prescaler: 0,
        }
    }
}

#[derive(Debug)]
pub struct Rtc {
    config: RtcConfig,
    state: RtcState,
    irq: IrqLine,
    deadline_ns: Option<i64>,
}

impl Rtc {
    pub fn new(config: RtcConfig) -> Self {
        Self { config, state: RtcState::default(), irq: IrqLine::new(), deadline_ns: None }
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }

    pub fn state(&self) -> &RtcState {
        &self.state
    }

    pub fn save_state(&self) -> RtcState {
        self.state.clone()
    }

    /// Restores a saved state and, if it was running, rearms against the
    /// restored `last_reconcile_ns` anchor - the post-load reconciliation
    /// hook, mirroring [`crate::peripherals::timer::Timer::load_state`].
    pub fn load_state(&mut self, state: RtcState) {
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

    fn freq_hz(&self) -> u64 {
        let shift = self.state.prescaler & PRESCALER_MASK;
        (REF_FREQ_HZ >> shift.min(63)).max(1)
    }

    fn ns_to_ticks(&self, delta_ns: i64) -> u64 {
        if delta_ns <= 0 {
            return 0;
        }
        ((delta_ns as u128 * self.freq_hz() as u128) / 1_000_000_000u128) as u64
    }

    /// Rounds up so that reconciling at the returned deadline always
    /// observes at least `ticks` elapsed, avoiding a stalled rearm loop
    /// from floor/floor round-trip error.
    fn ticks_to_ns(&self, ticks: u64) -> i64 {
        let freq = self.freq_hz() as u128;
        let numerator = ticks as u128 * 1_000_000_000u128;
        ((numerator + freq - 1) / freq) as i64
    }

    fn reconcile(&mut self, now_ns: i64) {
        let delta = now_ns - self.state.last_reconcile_ns;
        let ticks = self.ns_to_ticks(delta);

        let mut distances = [0u64; NUM_CC];
        for i in 0..NUM_CC {
            distances[i] = (self.state.cc[i] as u64 + COUNTER_MODULUS - (self.state.counter as u64)) % COUNTER_MODULUS;
        }

        self.state.counter = (((self.state.counter as u64) + ticks) % COUNTER_MODULUS) as u32;
        self.state.last_reconcile_ns = now_ns;

        for i in 0..NUM_CC {
            if distances[i] <= ticks {
                self.state.events_compare[i] = true;
            }
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

        let min_ticks = (0..NUM_CC)
            .filter(|&i| !self.state.events_compare[i])
            .map(|i| {
                let counter = self.state.counter as u64;
                let cc = self.state.cc[i] as u64;
                ((cc + COUNTER_MODULUS - counter - 1) % COUNTER_MODULUS) + 1
            })
            .min();

        self.deadline_ns = min_ticks.map(|ticks| now_ns + self.ticks_to_ns(ticks));
    }
}

impl Clocked for Rtc {
    fn deadline_ns(&self) -> Option<i64> {
        self.deadline_ns
    }

    fn expire(&mut self, now_ns: i64) {
        self.reconcile(now_ns);
    }
}

impl Rtc {
    /// `now_ns` is the true current virtual time, supplied by the caller
    /// so a read of the counter register is never stale relative to the
    /// real elapsed time even when nothing was due to expire on its own.
    pub fn read(&mut self, offset: u32, size: u8, now_ns: i64) -> u64 {
        if size != 4 || offset % 4 != 0 {
            warn!("rtc{}: misaligned or short read at {offset:#x}", self.config.id);
            return 0;
        }

        match offset {
            EVENT_COMPARE_BASE..EVENT_COMPARE_END => {
                let i = ((offset - EVENT_COMPARE_BASE) / 4) as usize;
                self.state.events_compare[i] as u64
            }
            EVENT_TICK | EVENT_OVRFLW => 0,
            REG_INTENSET | REG_INTENCLR => self.state.inten as u64,
            REG_COUNTER => {
                self.reconcile(now_ns);
                self.state.counter as u64
            }
            REG_PRESCALER => self.state.prescaler as u64,
            CC_BASE..CC_END => {
                let i = ((offset - CC_BASE) / 4) as usize;
                self.state.cc[i] as u64
            }
            _ => {
                warn!("rtc{}: read from unknown offset {offset:#x}", self.config.id);
                0
            }
        }
    }

    pub fn write(&mut self, offset: u32, size: u8, value: u64, now_ns: i64) {
        if size != 4 || offset % 4 != 0 {
            warn!("rtc{}: misaligned or short write at {offset:#x}", self.config.id);
            return;
        }
        let value = value as u32;

        match offset {
            TASK_START => {
                if value == 1 && !self.state.running {
                    self.state.running = true;
                    self.rearm(now_ns);
                }
            }
            TASK_STOP => {
                if value == 1 {
                    self.state.running = false;
                    self.deadline_ns = None;
                }
            }
            TASK_CLEAR => {
                if value == 1 {
                    self.state.last_reconcile_ns = now_ns;
                    self.state.counter = 0;
                    if self.state.running {
                        self.rearm(now_ns);
                    }
                }
            }
            TASK_TRIGOVRFLW => {
                // EVENT_OVRFLW generation is not modeled; accepted as a no-op.
            }
            EVENT_COMPARE_BASE..EVENT_COMPARE_END => {
                let i = ((offset - EVENT_COMPARE_BASE) / 4) as usize;
                if value == 0 {
                    self.state.events_compare[i] = false;
                    if self.state.running {
                        self.reconcile(now_ns);
                    }
                }
            }
            EVENT_TICK | EVENT_OVRFLW => {}
            REG_INTENSET => self.state.inten |= value & INTEN_MASK,
            REG_INTENCLR => self.state.inten &= !(value & INTEN_MASK),
            REG_PRESCALER => {
                if self.state.running {
                    warn!("rtc{}: erroneous change of PRESCALER while running", self.config.id);
                }
                self.state.prescaler = value & PRESCALER_MASK;
            }
            CC_BASE..CC_END => {
                if self.state.running {
                    self.reconcile(now_ns);
                }
                let i = ((offset - CC_BASE) / 4) as usize;
                self.state.cc[i] = value % (COUNTER_MODULUS as u32);
                if self.state.running {
                    self.rearm(now_ns);
                }
            }
            _ => {
                warn!("rtc{}: write to unknown offset {offset:#x}", self.config.id);
            }
        }

        self.update_irq();
    }

    pub fn reset(&mut self) {
        self.state = RtcState::default();
        self.deadline_ns = None;
        self.irq.set(false);
    }
}
