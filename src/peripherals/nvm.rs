//! Non-volatile memory subsystem: NOR-flash array, NVMC control window,
//! the read-only FICR fixture and the writable/erasable UICR fixture.
//!
//! All four windows share one piece of state (`NvmShared`) behind a
//! `Rc<RefCell<_>>`, one handle per [`Peripheral`] impl, mirroring the way
//! the four MMIO regions of a single hardware block all read and write
//! through one underlying device model rather than four independent ones.
use std::cell::RefCell;
use std::rc::Rc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::framework::Peripheral;

pub const PAGE_SIZE: u32 = 4096;
pub const FICR_WORDS: usize = 776;
pub const UICR_WORDS: usize = 352;
/// Default when instantiated standalone, not as part of a SoC; the SoC
/// composition root always passes an explicit `flash_size` instead.
pub const DEFAULT_FLASH_SIZE: u32 = 256 * 1024;

const NVMC_READY: u32 = 0x400;
const NVMC_CONFIG: u32 = 0x504;
const NVMC_ERASEPCR1: u32 = 0x508;
const NVMC_ERASEPCR0: u32 = 0x510;
const NVMC_ERASEALL: u32 = 0x50C;
const NVMC_ERASEUICR: u32 = 0x514;

const CONFIG_MASK: u32 = 0b11;
const CONFIG_WEN: u32 = 0b01;
const CONFIG_EEN: u32 = 0b10;
const ERASE_TRIGGER: u32 = 1;

const UICR_PSELRESET_0: u32 = 0x200;
const UICR_PSELRESET_1: u32 = 0x204;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NvmConfig {
    pub flash_size: u32,
}

impl Default for NvmConfig {
    fn default() -> Self {
        Self { flash_size: DEFAULT_FLASH_SIZE }
    }
}

pub const NVM_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
pub struct NvmState {
    pub version: u32,
    pub ficr_content: Vec<u32>,
    pub uicr_content: Vec<u32>,
    pub config: u32,
}

#[derive(Debug)]
struct NvmShared {
    flash_size: u32,
    storage: Vec<u8>,
    ficr_content: Vec<u32>,
    uicr_content: Vec<u32>,
    config: u32,
}

impl NvmShared {
    fn new(flash_size: u32) -> Self {
        Self {
            flash_size,
            storage: vec![0xFF; flash_size as usize],
            ficr_content: vec![0xFFFF_FFFF; FICR_WORDS],
            uicr_content: vec![0xFFFF_FFFF; UICR_WORDS],
            config: 0,
        }
    }

    fn reset(&mut self) {
        self.config = 0;
        self.ficr_content.iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
        self.uicr_content.iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
        self.storage.iter_mut().for_each(|b| *b = 0xFF);
    }

    fn wen(&self) -> bool {
        self.config & CONFIG_WEN != 0
    }

    fn een(&self) -> bool {
        self.config & CONFIG_EEN != 0
    }

    fn erase_page(&mut self, addr: u32) {
        if !self.een() {
            warn!("nvm: page erase rejected, EEN not set");
            return;
        }
        let aligned = addr - (addr % PAGE_SIZE);
        if aligned as u64 + PAGE_SIZE as u64 <= self.flash_size as u64 {
            let start = aligned as usize;
            let end = start + PAGE_SIZE as usize;
            self.storage[start..end].fill(0xFF);
        } else {
            warn!("nvm: page erase address {addr:#x} out of range");
        }
    }

    fn erase_all(&mut self) {
        if !self.een() {
            warn!("nvm: ERASEALL rejected, EEN not set");
            return;
        }
        self.storage.iter_mut().for_each(|b| *b = 0xFF);
        self.uicr_content.iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
    }

    fn erase_uicr(&mut self) {
        self.uicr_content.iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
    }

    fn flash_read(&self, offset: u32, size: u8) -> u64 {
        let offset = offset as usize;
        let n = size as usize;
        let mut bytes = [0u8; 8];
        if offset + n <= self.storage.len() {
            bytes[..n].copy_from_slice(&self.storage[offset..offset + n]);
        }
        u64::from_le_bytes(bytes)
    }

    fn flash_write(&mut self, offset: u32, size: u8, value: u64) {
        if !self.wen() {
            warn!("nvm: store to flash rejected, WEN not set");
            return;
        }
        let offset = offset as usize;
        let n = size as usize;
        if offset + n > self.storage.len() {
            warn!("nvm: store to flash out of range at {offset:#x}");
            return;
        }
        let bytes = value.to_le_bytes();
        for i in 0..n {
            self.storage[offset + i] &= bytes[i];
        }
    }
}

/// NVMC control window: READY/CONFIG/erase tasks.
#[derive(Debug)]
pub struct Nvmc {
    shared: Rc<RefCell<NvmShared>>,
}

impl Peripheral for Nvmc {
    fn read(&mut self, offset: u32, size: u8) -> u64 {
        let s = self.shared.borrow();
        if size != 4 || offset % 4 != 0 {
            warn!("nvmc: misaligned or short read at {offset:#x}");
            return 0;
        }
        match offset {
            NVMC_READY => 1,
            NVMC_CONFIG => s.config as u64,
            _ => {
                warn!("nvmc: read from unknown offset {offset:#x}");
                0
            }
        }
    }

    fn write(&mut self, offset: u32, size: u8, value: u64) {
        if size != 4 || offset % 4 != 0 {
            warn!("nvmc: misaligned or short write at {offset:#x}");
            return;
        }
        let value = value as u32;
        let mut s = self.shared.borrow_mut();
        match offset {
            NVMC_CONFIG => s.config = value & CONFIG_MASK,
            // The value written is the page address itself, not an offset
            // into this register's own window.
            NVMC_ERASEPCR0 | NVMC_ERASEPCR1 => {
                s.erase_page(value);
            }
            NVMC_ERASEALL => {
                if value == ERASE_TRIGGER {
                    s.erase_all();
                }
            }
            NVMC_ERASEUICR => {
                if value == ERASE_TRIGGER {
                    s.erase_uicr();
                }
            }
            _ => {
                warn!("nvmc: write to unknown offset {offset:#x}");
            }
        }
    }

    fn reset(&mut self) {
        self.shared.borrow_mut().config = 0;
    }
}

/// Factory Information Configuration Registers: read-only, writes discarded.
#[derive(Debug)]
pub struct Ficr {
    shared: Rc<RefCell<NvmShared>>,
}

impl Peripheral for Ficr {
    fn read(&mut self, offset: u32, size: u8) -> u64 {
        if size != 4 || offset % 4 != 0 {
            warn!("ficr: misaligned or short read at {offset:#x}");
            return 0;
        }
        let idx = (offset / 4) as usize;
        let s = self.shared.borrow();
        if idx >= s.ficr_content.len() {
            warn!("ficr: out-of-range read at {offset:#x}");
            return 0;
        }
        s.ficr_content[idx] as u64
    }

    fn write(&mut self, offset: u32, _size: u8, _value: u64) {
        warn!("ficr: write at {offset:#x} discarded, FICR is read-only");
    }

    fn reset(&mut self) {
        self.shared.borrow_mut().ficr_content.iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
    }
}

/// User Information Configuration Registers: readable, word-writable,
/// erasable. `PSELRESET_0`/`PSELRESET_1` always read back as zero.
#[derive(Debug)]
pub struct Uicr {
    shared: Rc<RefCell<NvmShared>>,
}

impl Peripheral for Uicr {
    fn read(&mut self, offset: u32, size: u8) -> u64 {
        if size != 4 || offset % 4 != 0 {
            warn!("uicr: misaligned or short read at {offset:#x}");
            return 0;
        }
        if offset == UICR_PSELRESET_0 || offset == UICR_PSELRESET_1 {
            return 0;
        }
        let idx = (offset / 4) as usize;
        let s = self.shared.borrow();
        if idx >= s.uicr_content.len() {
            warn!("uicr: out-of-range read at {offset:#x}");
            return 0;
        }
        s.uicr_content[idx] as u64
    }

    fn write(&mut self, offset: u32, size: u8, value: u64) {
        if size != 4 || offset % 4 != 0 {
            warn!("uicr: misaligned or short write at {offset:#x}");
            return;
        }
        let idx = (offset / 4) as usize;
        let mut s = self.shared.borrow_mut();
        if idx >= s.uicr_content.len() {
            warn!("uicr: out-of-range write at {offset:#x}");
            return;
        }
        s.uicr_content[idx] = value as u32;
    }

    fn reset(&mut self) {
        self.shared.borrow_mut().uicr_content.iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
    }
}

/// The flash array itself: ordinarily mapped read-only-data for fast guest
/// reads, with stores trapped into NOR AND-semantics.
#[derive(Debug)]
pub struct FlashWindow {
    shared: Rc<RefCell<NvmShared>>,
}

impl Peripheral for FlashWindow {
    fn read(&mut self, offset: u32, size: u8) -> u64 {
        self.shared.borrow().flash_read(offset, size)
    }

    fn write(&mut self, offset: u32, size: u8, value: u64) {
        self.shared.borrow_mut().flash_write(offset, size, value);
    }

    fn reset(&mut self) {
        self.shared.borrow_mut().storage.iter_mut().for_each(|b| *b = 0xFF);
    }
}

/// Owns the shared NVM state and hands out the four windows that get
/// mapped into the address space separately.
#[derive(Debug)]
pub struct Nvm {
    shared: Rc<RefCell<NvmShared>>,
}

impl Nvm {
    pub fn new(config: NvmConfig) -> Self {
        Self { shared: Rc::new(RefCell::new(NvmShared::new(config.flash_size))) }
    }

    pub fn nvmc(&self) -> Nvmc {
        Nvmc { shared: self.shared.clone() }
    }

    pub fn ficr(&self) -> Ficr {
        Ficr { shared: self.shared.clone() }
    }

    pub fn uicr(&self) -> Uicr {
        Uicr { shared: self.shared.clone() }
    }

    pub fn flash(&self) -> FlashWindow {
        FlashWindow { shared: self.shared.clone() }
    }

    pub fn reset(&mut self) {
        self.shared.borrow_mut().reset();
    }

    pub fn save_state(&self) -> NvmState {
        let s = self.shared.borrow();
        NvmState {
            version: NVM_SCHEMA_VERSION,
            ficr_content: s.ficr_content.clone(),
            uicr_content: s.uicr_content.clone(),
            config: s.config,
        }
    }

    pub fn load_state(&mut self, state: NvmState) {
        let mut s = self.shared.borrow_mut();
        s.ficr_content = state.ficr_content;
        s.uicr_content = state.uicr_content;
        s.config = state.config;
    }

    /// The flash body is migrated as a raw byte blob alongside `NvmState`
    /// rather than through it, mirroring a host-RAM-backed region rather
    /// than a small struct of scalar fields.
    pub fn flash_bytes(&self) -> Vec<u8> {
        self.shared.borrow().storage.clone()
    }

    pub fn load_flash_bytes(&mut self, bytes: Vec<u8>) {
        let mut s = self.shared.borrow_mut();
        debug_assert_eq!(bytes.len(), s.flash_size as usize);
        s.storage = bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_write_requires_wen() {
        let nvm = Nvm::new(NvmConfig::default());
        let mut flash = nvm.flash();
        let mut nvmc = nvm.nvmc();

        flash.write(0x0, 4, 0x1234_5678);
        assert_eq!(flash.read(0x0, 4), 0xFFFF_FFFF);

        nvmc.write(NVMC_CONFIG, 4, CONFIG_WEN as u64);
        flash.write(0x0, 4, 0x1234_5678);
        assert_eq!(flash.read(0x0, 4), 0x1234_5678);

        flash.write(0x0, 4, 0xF0F0_F0F0);
        assert_eq!(flash.read(0x0, 4), 0x1030_5070);
    }

    #[test]
    fn page_erase_bounds_are_exact() {
        let nvm = Nvm::new(NvmConfig::default());
        let mut flash = nvm.flash();
        let mut nvmc = nvm.nvmc();

        nvmc.write(NVMC_CONFIG, 4, CONFIG_EEN as u64);
        flash.write(0x1FFC, 4, 0x0000_0000);
        flash.write(0x2FFC, 4, 0x0000_0000);
        flash.write(0x3000, 4, 0x0000_0000);

        nvmc.write(NVMC_ERASEPCR0, 4, 0x2000);

        assert_eq!(flash.read(0x2FFC, 4), 0xFFFF_FFFF);
        assert_eq!(flash.read(0x1FFC, 4), 0x0000_0000);
        assert_eq!(flash.read(0x3000, 4), 0x0000_0000);
    }

    #[test]
    fn erase_all_clears_flash_and_uicr() {
        let nvm = Nvm::new(NvmConfig::default());
        let mut flash = nvm.flash();
        let mut uicr = nvm.uicr();
        let mut nvmc = nvm.nvmc();

        nvmc.write(NVMC_CONFIG, 4, (CONFIG_WEN | CONFIG_EEN) as u64);
        flash.write(0x0, 4, 0);
        uicr.write(0x0, 4, 0);

        nvmc.write(NVMC_ERASEALL, 4, 1);

        assert_eq!(flash.read(0x0, 4), 0xFFFF_FFFF);
        assert_eq!(uicr.read(0x0, 4), 0xFFFF_FFFF);
    }

    #[test]
    fn ficr_writes_are_discarded() {
        let nvm = Nvm::new(NvmConfig::default());
        let mut ficr = nvm.ficr();
        ficr.write(0x0, 4, 0x1234);
        assert_eq!(ficr.read(0x0, 4), 0xFFFF_FFFF);
    }

    #[test]
    fn uicr_pselreset_always_reads_zero() {
        let nvm = Nvm::new(NvmConfig::default());
        let mut uicr = nvm.uicr();
        uicr.write(UICR_PSELRESET_0, 4, 0x1234);
        assert_eq!(uicr.read(UICR_PSELRESET_0, 4), 0);
        assert_eq!(uicr.read(UICR_PSELRESET_1, 4), 0);
    }

    #[test]
    fn erase_page_without_een_is_rejected() {
        let nvm = Nvm::new(NvmConfig::default());
        let mut flash = nvm.flash();
        let mut nvmc = nvm.nvmc();

        nvmc.write(NVMC_CONFIG, 4, CONFIG_WEN as u64);
        flash.write(0x0, 4, 0);
        nvmc.write(NVMC_ERASEPCR0, 4, 0x0);

        assert_eq!(flash.read(0x0, 4), 0);
    }

    #[test]
    fn flash_bytes_round_trip_restores_storage() {
        let nvm = Nvm::new(NvmConfig { flash_size: PAGE_SIZE });
        let mut flash = nvm.flash();
        let mut nvmc = nvm.nvmc();
        nvmc.write(NVMC_CONFIG, 4, CONFIG_WEN as u64);
        flash.write(0x0, 4, 0xDEAD_BEEF);

        let bytes = nvm.flash_bytes();

        let mut restored = Nvm::new(NvmConfig { flash_size: PAGE_SIZE });
        restored.load_flash_bytes(bytes);
        assert_eq!(restored.flash().read(0x0, 4), 0xDEAD_BEEF);
    }
}
