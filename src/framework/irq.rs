//! A single interrupt output line.
//!
//! Peripherals in this crate each expose exactly one IRQ line (the
//! nRF52840 gives every sysbus peripheral its own NVIC input). `IrqLine`
//! models it as a level-triggered boolean that only records edges,
//! mirroring `qemu_set_irq`/`qemu_irq` without pulling in a generic
//! fan-out GPIO framework this crate has no other use for.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqLine {
    asserted: bool,
}

impl IrqLine {
    pub fn new() -> Self {
        Self { asserted: false }
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    /// Set the line to `level`, returning `true` if this call changed it
    /// (i.e. produced an edge a connected CPU input would observe).
    pub fn set(&mut self, level: bool) -> bool {
        let changed = level != self.asserted;
        self.asserted = level;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_deasserted() {
        assert!(!IrqLine::new().is_asserted());
    }

    #[test]
    fn set_reports_edge_only_on_change() {
        let mut irq = IrqLine::new();
        assert!(irq.set(true));
        assert!(!irq.set(true));
        assert!(irq.set(false));
        assert!(!irq.set(false));
    }
}
