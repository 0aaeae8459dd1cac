//! SoC composition: instantiates every peripheral, maps its MMIO window(s)
//! into the address space, and wires its interrupt output to a CPU input
//! line derived purely from the window's base address.
//!
//! Peripherals with their own reconciliation/rearm logic (timer, RTC,
//! clock) are kept as concrete fields rather than behind the generic
//! `Peripheral` trait object used for RAM and the unmapped holes, so the
//! SoC can reach their `Clocked`/`irq()` surface directly instead of
//! downcasting. This mirrors dispatching on "the offset family" rather
//! than routing every access through one more layer of indirection.
//!
//! The CPU itself, the kernel loader and the UART/RNG internals are
//! external collaborators this crate does not implement; [`CpuIrqLines`]
//! stands in for "a CPU model exposing input interrupt lines by index" so
//! the wiring can be exercised and observed without a real core attached.
use serde::{Deserialize, Serialize};

use crate::framework::{AddressSpace, Clocked, ConfigError, Peripheral, VirtualClock};
use crate::peripherals::clock::{Clock, ClockState};
use crate::peripherals::nvm::{Ficr, FlashWindow, Nvm, NvmConfig, NvmState, Nvmc, Uicr, FICR_WORDS, UICR_WORDS};
use crate::peripherals::rtc::{Rtc, RtcConfig, RtcState};
use crate::peripherals::stubs::{RngConfig, RngStub, UartConfig, UartStub};
use crate::peripherals::timer::{Timer, TimerConfig, TimerState};

pub const UART_BASE: u64 = 0x4000_2000;
pub const CLOCK_BASE: u64 = 0x4000_0000;
pub const RNG_BASE: u64 = 0x4000_D000;
pub const NVMC_BASE: u64 = 0x4001_E000;
pub const FICR_BASE: u64 = 0x1000_0000;
pub const UICR_BASE: u64 = 0x1000_1000;
pub const FLASH_BASE: u64 = 0x0000_0000;
pub const RTC_BASES: [u64; 3] = [0x4000_B000, 0x4001_1000, 0x4002_4000];
pub const TIMER_BASES: [u64; 3] = [0x4000_8000, 0x4000_9000, 0x4000_A000];
pub const SRAM_BASE: u64 = 0x2000_0000;

pub const PERIPHERAL_WINDOW: u64 = 0x1000;

const IOMEM_HOLE_BASE: u64 = 0x4000_0000;
const IOMEM_HOLE_SIZE: u64 = 0x1000_0000;
const PRIVATE_HOLE_BASE: u64 = 0xF000_0000;
const PRIVATE_HOLE_SIZE: u64 = 0x1000_0000;

fn base_to_irq(base: u64) -> u32 {
    ((base >> 12) & 0x1F) as u32
}

/// Stand-in for the CPU's NVIC input lines: 32 booleans a SoC can set by
/// index. A real CPU model would consume these; tests observe them
/// directly.
#[derive(Debug, Clone, Copy)]
pub struct CpuIrqLines {
    lines: [bool; 32],
}

impl Default for CpuIrqLines {
    fn default() -> Self {
        Self { lines: [false; 32] }
    }
}

impl CpuIrqLines {
    pub fn set(&mut self, index: u32, level: bool) {
        if let Some(slot) = self.lines.get_mut(index as usize) {
            *slot = level;
        }
    }

    pub fn is_asserted(&self, index: u32) -> bool {
        self.lines.get(index as usize).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SocConfig {
    pub sram_size: u32,
    pub flash_size: u32,
}

impl Default for SocConfig {
    fn default() -> Self {
        Self { sram_size: 64 * 1024, flash_size: 1024 * 1024 }
    }
}

/// The byte-oriented migration entry point this crate exposes: one
/// bincode-encoded envelope collecting every peripheral's own versioned
/// schema, plus the flash body migrated alongside as a raw blob rather
/// than through `NvmState`.
#[derive(Serialize, Deserialize)]
struct SocState {
    timers: [TimerState; 3],
    rtcs: [RtcState; 3],
    clock: ClockState,
    nvm: NvmState,
    flash: Vec<u8>,
}

#[derive(Debug)]
pub struct Nrf52840Soc {
    address_space: AddressSpace,
    clock: VirtualClock,
    irq: CpuIrqLines,
    timers: [Timer; 3],
    rtcs: [Rtc; 3],
    clock_ctrl: Clock,
    uart: UartStub,
    rng: RngStub,
    nvm: Nvm,
    nvmc: Nvmc,
    ficr: Ficr,
    uicr: Uicr,
    flash: FlashWindow,
    flash_size: u32,
}

impl Nrf52840Soc {
    /// Realise the SoC: `board_memory` stands in for the required `memory`
    /// link property, which must be set before realisation.
    pub fn realize(config: SocConfig, board_memory: Option<Vec<u8>>) -> Result<Self, ConfigError> {
        let board_memory = board_memory.ok_or(ConfigError::MissingLink("memory"))?;

        let mut address_space = AddressSpace::new();
        address_space.add_ram(0, board_memory, -1);
        address_space.add_ram(SRAM_BASE, vec![0u8; config.sram_size as usize], 0);
        address_space.add_unmapped(IOMEM_HOLE_BASE, IOMEM_HOLE_SIZE);
        address_space.add_unmapped(PRIVATE_HOLE_BASE, PRIVATE_HOLE_SIZE);

        let nvm = Nvm::new(NvmConfig { flash_size: config.flash_size });
        let nvmc = nvm.nvmc();
        let ficr = nvm.ficr();
        let uicr = nvm.uicr();
        let flash = nvm.flash();
        let timers = std::array::from_fn(|id| Timer::new(TimerConfig { id: id as u8 }));
        let rtcs = std::array::from_fn(|id| Rtc::new(RtcConfig { id: id as u8 }));

        Ok(Self {
            address_space,
            clock: VirtualClock::new(),
            irq: CpuIrqLines::default(),
            timers,
            rtcs,
            clock_ctrl: Clock::new(),
            uart: UartStub::new(UartConfig::default()),
            rng: RngStub::new(RngConfig::default()),
            nvm,
            nvmc,
            ficr,
            uicr,
            flash,
            flash_size: config.flash_size,
        })
    }

    pub fn irq(&self) -> &CpuIrqLines {
        &self.irq
    }

    pub fn read(&mut self, addr: u64, size: u8) -> u64 {
        let value = self.dispatch_peripheral_read(addr, size).unwrap_or_else(|| self.address_space.read(addr, size));
        self.route_irqs();
        value
    }

    pub fn write(&mut self, addr: u64, size: u8, value: u64) {
        if !self.dispatch_peripheral_write(addr, size, value) {
            self.address_space.write(addr, size, value);
        }
        self.route_irqs();
    }

    fn dispatch_peripheral_read(&mut self, addr: u64, size: u8) -> Option<u64> {
        let now_ns = self.clock.now_ns();
        for (i, base) in TIMER_BASES.into_iter().enumerate() {
            if (base..base + PERIPHERAL_WINDOW).contains(&addr) {
                return Some(self.timers[i].read((addr - base) as u32, size));
            }
        }
        for (i, base) in RTC_BASES.into_iter().enumerate() {
            if (base..base + PERIPHERAL_WINDOW).contains(&addr) {
                return Some(self.rtcs[i].read((addr - base) as u32, size, now_ns));
            }
        }
        if (CLOCK_BASE..CLOCK_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            return Some(self.clock_ctrl.read((addr - CLOCK_BASE) as u32, size));
        }
        if (UART_BASE..UART_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            return Some(self.uart.read((addr - UART_BASE) as u32, size));
        }
        if (RNG_BASE..RNG_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            return Some(self.rng.read((addr - RNG_BASE) as u32, size));
        }
        if (NVMC_BASE..NVMC_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            return Some(self.nvmc.read((addr - NVMC_BASE) as u32, size));
        }
        let ficr_window = FICR_WORDS as u64 * 4;
        if (FICR_BASE..FICR_BASE + ficr_window).contains(&addr) {
            return Some(self.ficr.read((addr - FICR_BASE) as u32, size));
        }
        let uicr_window = UICR_WORDS as u64 * 4;
        if (UICR_BASE..UICR_BASE + uicr_window).contains(&addr) {
            return Some(self.uicr.read((addr - UICR_BASE) as u32, size));
        }
        if (FLASH_BASE..FLASH_BASE + self.flash_size as u64).contains(&addr) {
            return Some(self.flash.read((addr - FLASH_BASE) as u32, size));
        }
        None
    }

    fn dispatch_peripheral_write(&mut self, addr: u64, size: u8, value: u64) -> bool {
        let now_ns = self.clock.now_ns();
        for (i, base) in TIMER_BASES.into_iter().enumerate() {
            if (base..base + PERIPHERAL_WINDOW).contains(&addr) {
                self.timers[i].write((addr - base) as u32, size, value, now_ns);
                return true;
            }
        }
        for (i, base) in RTC_BASES.into_iter().enumerate() {
            if (base..base + PERIPHERAL_WINDOW).contains(&addr) {
                self.rtcs[i].write((addr - base) as u32, size, value, now_ns);
                return true;
            }
        }
        if (CLOCK_BASE..CLOCK_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            self.clock_ctrl.write((addr - CLOCK_BASE) as u32, size, value);
            return true;
        }
        if (UART_BASE..UART_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            self.uart.write((addr - UART_BASE) as u32, size, value);
            return true;
        }
        if (RNG_BASE..RNG_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            self.rng.write((addr - RNG_BASE) as u32, size, value);
            return true;
        }
        if (NVMC_BASE..NVMC_BASE + PERIPHERAL_WINDOW).contains(&addr) {
            self.nvmc.write((addr - NVMC_BASE) as u32, size, value);
            return true;
        }
        let ficr_window = FICR_WORDS as u64 * 4;
        if (FICR_BASE..FICR_BASE + ficr_window).contains(&addr) {
            self.ficr.write((addr - FICR_BASE) as u32, size, value);
            return true;
        }
        let uicr_window = UICR_WORDS as u64 * 4;
        if (UICR_BASE..UICR_BASE + uicr_window).contains(&addr) {
            self.uicr.write((addr - UICR_BASE) as u32, size, value);
            return true;
        }
        if (FLASH_BASE..FLASH_BASE + self.flash_size as u64).contains(&addr) {
            self.flash.write((addr - FLASH_BASE) as u32, size, value);
            return true;
        }
        false
    }

    /// Advance virtual time, expiring any armed timer/RTC compare event
    /// along the way, then resample every peripheral's interrupt line onto
    /// its wired CPU input.
    pub fn advance_to(&mut self, now_ns: i64) {
        let mut clocked: Vec<&mut dyn Clocked> = Vec::new();
        for t in &mut self.timers {
            clocked.push(t);
        }
        for r in &mut self.rtcs {
            clocked.push(r);
        }
        self.clock.advance_to(now_ns, &mut clocked);
        self.route_irqs();
    }

    pub fn now_ns(&self) -> i64 {
        self.clock.now_ns()
    }

    /// Serialises every peripheral's migration schema into one bincode
    /// blob. Encoding an in-memory struct of plain data cannot fail.
    pub fn save_state(&self) -> Vec<u8> {
        let state = SocState {
            timers: std::array::from_fn(|i| self.timers[i].save_state()),
            rtcs: std::array::from_fn(|i| self.rtcs[i].save_state()),
            clock: self.clock_ctrl.save_state(),
            nvm: self.nvm.save_state(),
            flash: self.nvm.flash_bytes(),
        };
        bincode::serialize(&state).expect("SocState is plain data and always encodes")
    }

    /// Restores a blob produced by [`Nrf52840Soc::save_state`]. Timer/RTC
    /// post-load reconciliation happens inside their own `load_state`.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), bincode::Error> {
        let state: SocState = bincode::deserialize(bytes)?;
        for (timer, saved) in self.timers.iter_mut().zip(state.timers) {
            timer.load_state(saved);
        }
        for (rtc, saved) in self.rtcs.iter_mut().zip(state.rtcs) {
            rtc.load_state(saved);
        }
        self.clock_ctrl.load_state(state.clock);
        self.nvm.load_state(state.nvm);
        self.nvm.load_flash_bytes(state.flash);
        self.route_irqs();
        Ok(())
    }

    pub fn reset(&mut self) {
        for t in &mut self.timers {
            t.reset();
        }
        for r in &mut self.rtcs {
            r.reset();
        }
        self.clock_ctrl.reset();
        self.uart.reset();
        self.rng.reset();
        self.nvm.reset();
        self.route_irqs();
    }

    fn route_irqs(&mut self) {
        for (i, base) in TIMER_BASES.into_iter().enumerate() {
            self.irq.set(base_to_irq(base), self.timers[i].irq().is_asserted());
        }
        for (i, base) in RTC_BASES.into_iter().enumerate() {
            self.irq.set(base_to_irq(base), self.rtcs[i].irq().is_asserted());
        }
        self.irq.set(base_to_irq(CLOCK_BASE), self.clock_ctrl.irq().is_asserted());
        self.irq.set(base_to_irq(UART_BASE), self.uart.irq().is_asserted());
        self.irq.set(base_to_irq(RNG_BASE), self.rng.irq().is_asserted());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_soc() -> Nrf52840Soc {
        Nrf52840Soc::realize(SocConfig::default(), Some(vec![0u8; 0x1000])).unwrap()
    }

    #[test]
    fn realize_without_memory_link_fails() {
        let err = Nrf52840Soc::realize(SocConfig::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingLink("memory")));
    }

    #[test]
    fn timer_one_shot_routes_irq_to_derived_input() {
        let mut soc = fresh_soc();
        soc.write(TIMER_BASES[0] + 0x510, 4, 4); // PRESCALER
        soc.write(TIMER_BASES[0] + 0x508, 4, 3); // BITMODE
        soc.write(TIMER_BASES[0] + 0x540, 4, 4000); // CC0
        soc.write(TIMER_BASES[0] + 0x304, 4, 0x1_0000); // INTENSET
        soc.write(TIMER_BASES[0] + 0x000, 4, 1); // TASK_START

        soc.advance_to(1_000_000);

        assert_eq!(soc.read(TIMER_BASES[0] + 0x140, 4), 1);
        let irq_num = base_to_irq(TIMER_BASES[0]);
        assert!(soc.irq().is_asserted(irq_num));
    }

    #[test]
    fn sram_is_mapped_and_writable() {
        let mut soc = fresh_soc();
        soc.write(SRAM_BASE + 8, 4, 0xCAFEBABE);
        assert_eq!(soc.read(SRAM_BASE + 8, 4), 0xCAFEBABE);
    }

    #[test]
    fn unmapped_hole_reads_zero() {
        let mut soc = fresh_soc();
        assert_eq!(soc.read(0x4000_5000, 4), 0);
    }

    #[test]
    fn flash_store_and_page_erase_round_trip() {
        let mut soc = fresh_soc();
        soc.write(NVMC_BASE + 0x504, 4, 0b01); // CONFIG: WEN
        soc.write(FLASH_BASE, 4, 0x1234_5678);
        assert_eq!(soc.read(FLASH_BASE, 4), 0x1234_5678);

        soc.write(NVMC_BASE + 0x504, 4, 0b10); // CONFIG: EEN
        soc.write(NVMC_BASE + 0x510, 4, 0); // ERASEPCR0 page 0
        assert_eq!(soc.read(FLASH_BASE, 4), 0xFFFF_FFFF);
    }

    #[test]
    fn save_restore_round_trips_across_the_whole_soc() {
        let mut soc = fresh_soc();
        soc.write(TIMER_BASES[0] + 0x510, 4, 4); // PRESCALER
        soc.write(TIMER_BASES[0] + 0x508, 4, 3); // BITMODE
        soc.write(TIMER_BASES[0] + 0x540, 4, 4000); // CC0
        soc.write(TIMER_BASES[0] + 0x000, 4, 1); // TASK_START
        soc.advance_to(1_000_000);
        soc.write(NVMC_BASE + 0x504, 4, 0b01); // CONFIG: WEN
        soc.write(FLASH_BASE, 4, 0xABCD_EF01);

        let blob = soc.save_state();
        let mut restored = fresh_soc();
        restored.load_state(&blob).unwrap();

        assert_eq!(restored.read(TIMER_BASES[0] + 0x140, 4), soc.read(TIMER_BASES[0] + 0x140, 4));
        assert_eq!(restored.read(FLASH_BASE, 4), 0xABCD_EF01);
    }
}
