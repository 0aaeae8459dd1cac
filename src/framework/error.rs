//! Construction-time error surface.
//!
//! Guest programming errors (bad offsets, WEN/EEN violations, ...) are never
//! represented here - they are logged and the access is a no-op, matching the
//! taxonomy of the peripherals this framework hosts. `ConfigError` only
//! covers failures that happen while wiring the SoC together, before any
//! vCPU instruction has executed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required link property `{0}` was not set before realisation")]
    MissingLink(&'static str),

    #[error("failed to realise sub-device `{device}`: {reason}")]
    RealiseFailed {
        device: &'static str,
        reason: String,
    },

    #[error("invalid flash size {0:#x}: must be a non-zero multiple of the page size")]
    InvalidFlashSize(u32),
}
