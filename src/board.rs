//! Board-level composition root: the thin wrapper that assembles one SoC
//! instance and hands it off to the host's kernel loader contract.
//!
//! Grounded on `nrf52840dk_init()`: bind the first host serial endpoint to
//! the SoC's `serial0` alias, set the `memory` link, realise the SoC, then
//! pass the kernel filename and flash size to the loader. The real
//! ARMv7-M loader is out of scope, so [`KernelLoader`] only records what
//! it was asked to load rather than decoding anything, the same way the
//! framework's stub peripherals stand in for hardware this crate doesn't
//! implement. `max_cpus` is fixed at [`MAX_CPUS`] rather than exposed as a
//! configuration option, mirroring `nrf52840dk_machine_class_init`'s
//! `mc->max_cpus = 1`.
use crate::framework::ConfigError;
use crate::soc::{Nrf52840Soc, SocConfig};

/// This board only ever drives a single core.
pub const MAX_CPUS: u32 = 1;

/// Stand-in for the host's `armv7m_load_kernel` contract: given a kernel
/// filename and the realised flash size, a real loader would read the
/// ELF/bin image and populate flash before the first instruction fetch.
/// This crate has neither file I/O nor an ARMv7-M decoder, so it only
/// records what it was asked to load.
#[derive(Debug, Clone, Default)]
pub struct KernelLoader {
    pub kernel_filename: Option<String>,
    pub flash_size: u32,
}

impl KernelLoader {
    fn load(kernel_filename: Option<&str>, flash_size: u32) -> Self {
        Self { kernel_filename: kernel_filename.map(str::to_owned), flash_size }
    }
}

/// One realised SoC plus the composition bookkeeping the board performs
/// around it.
pub struct Board {
    soc: Nrf52840Soc,
    loader: KernelLoader,
    serial0_bound: bool,
}

impl Board {
    /// Instantiates the SoC, sets its `memory` link, realises it, binds
    /// `serial0` and hands the kernel filename to the loader stub.
    ///
    /// `system_memory` stands in for the host's system memory region the
    /// real board links in before realisation; `kernel_filename` is the
    /// same string the host would otherwise pass straight through to
    /// `armv7m_load_kernel`.
    pub fn realize(config: SocConfig, system_memory: Vec<u8>, kernel_filename: Option<&str>) -> Result<Self, ConfigError> {
        let soc = Nrf52840Soc::realize(config, Some(system_memory))?;
        let loader = KernelLoader::load(kernel_filename, config.flash_size);
        // The UART model is an external-contract stub with nothing to
        // actually bind a host character device to; recording that the
        // step ran keeps the composition order observable in tests.
        Ok(Self { soc, loader, serial0_bound: true })
    }

    pub fn soc(&self) -> &Nrf52840Soc {
        &self.soc
    }

    pub fn soc_mut(&mut self) -> &mut Nrf52840Soc {
        &mut self.soc
    }

    pub fn loader(&self) -> &KernelLoader {
        &self.loader
    }

    pub fn serial0_bound(&self) -> bool {
        self.serial0_bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realize_binds_serial0_and_records_loader_inputs() {
        let board = Board::realize(SocConfig::default(), vec![0u8; 0x1000], Some("firmware.elf")).unwrap();
        assert!(board.serial0_bound());
        assert_eq!(board.loader().kernel_filename.as_deref(), Some("firmware.elf"));
        assert_eq!(board.loader().flash_size, SocConfig::default().flash_size);
    }

    #[test]
    fn realize_without_kernel_filename_still_succeeds() {
        let board = Board::realize(SocConfig::default(), vec![0u8; 0x1000], None).unwrap();
        assert!(board.loader().kernel_filename.is_none());
    }

    #[test]
    fn max_cpus_is_fixed_at_one() {
        assert_eq!(MAX_CPUS, 1);
    }

    #[test]
    fn soc_is_reachable_through_the_board_for_driving_the_emulation() {
        let mut board = Board::realize(SocConfig::default(), vec![0u8; 0x1000], None).unwrap();
        board.soc_mut().write(crate::soc::SRAM_BASE, 4, 0x1234_5678);
        assert_eq!(board.soc_mut().read(crate::soc::SRAM_BASE, 4), 0x1234_5678);
    }
}
