//! Minimal host-VM framework consumed by the peripheral models.
//!
//! Everything in this module stands in for the surrounding virtual
//! machine a sysbus device model normally plugs into: an address space to
//! route MMIO through, a virtual clock to reconcile free-running counters
//! against, a single-bit interrupt line, and the construction-time error
//! type raised while wiring devices together.

pub mod address_space;
pub mod clock;
pub mod error;
pub mod irq;
pub mod peripheral;

pub use address_space::AddressSpace;
pub use clock::{Clocked, VirtualClock};
pub use error::ConfigError;
pub use irq::IrqLine;
pub use peripheral::Peripheral;
