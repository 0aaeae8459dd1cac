//! External-contract-only peripherals.
//!
//! The UART and RNG device models are out of scope: only their presence
//! on the bus (a mapped MMIO window and a realised interrupt line) and
//! their construction-time property shape matter to anything this crate
//! builds. Both stubs accept any access, log nothing on plain reads or
//! writes, and never assert their interrupt line - a real implementation
//! would replace the struct body, not the wiring around it.
use serde::{Deserialize, Serialize};

use crate::framework::{IrqLine, Peripheral};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RngConfig {
    pub period_unfiltered_us: u32,
    pub period_filtered_us: u32,
}

impl Default for RngConfig {
    fn default() -> Self {
        Self { period_unfiltered_us: 167, period_filtered_us: 660 }
    }
}

#[derive(Debug)]
pub struct RngStub {
    #[allow(dead_code)]
    config: RngConfig,
    irq: IrqLine,
}

impl RngStub {
    pub fn new(config: RngConfig) -> Self {
        Self { config, irq: IrqLine::new() }
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }
}

impl Peripheral for RngStub {
    fn read(&mut self, _offset: u32, _size: u8) -> u64 {
        0
    }

    fn write(&mut self, _offset: u32, _size: u8, _value: u64) {}

    fn reset(&mut self) {
        self.irq.set(false);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UartConfig;

#[derive(Debug)]
pub struct UartStub {
    irq: IrqLine,
}

impl UartStub {
    pub fn new(_config: UartConfig) -> Self {
        Self { irq: IrqLine::new() }
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }
}

impl Peripheral for UartStub {
    fn read(&mut self, _offset: u32, _size: u8) -> u64 {
        0
    }

    fn write(&mut self, _offset: u32, _size: u8, _value: u64) {}

    fn reset(&mut self) {
        self.irq.set(false);
    }
}
