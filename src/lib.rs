//! nRF52840 peripheral emulation core.
//!
//! A host-driven model of the Nordic nRF52840's timer/RTC timekeeping
//! subsystems, NVM (flash/FICR/UICR), and clock controller, composed into
//! one SoC and wrapped by a thin board-level composition root. Nothing
//! here runs on its own clock: a host drives [`Nrf52840Soc::advance_to`]
//! to reconcile the virtual-clock-backed peripherals and dispatches MMIO
//! reads/writes the same way a surrounding CPU model would.
//!
//! # Architecture
//!
//! - `framework`: the minimal host-VM scaffolding every peripheral is
//!   built against - an [`framework::AddressSpace`], a
//!   [`framework::VirtualClock`], a single-bit [`framework::IrqLine`], the
//!   [`framework::Peripheral`] trait and the construction-time
//!   [`framework::ConfigError`] type.
//! - `peripherals`: one device model per MMIO block (`timer`, `rtc`,
//!   `clock`, `nvm`, and the external-contract `stubs` for UART/RNG).
//! - `soc`: instantiates every peripheral, maps its window(s), and wires
//!   interrupt outputs to CPU input lines derived from each window's base
//!   address.
//! - `board`: the composition root that realises one SoC, binds
//!   `serial0`, and hands off to the kernel loader contract.
pub mod board;
pub mod framework;
pub mod peripherals;
pub mod soc;

pub use board::Board;
pub use soc::{Nrf52840Soc, SocConfig};
