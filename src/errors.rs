use std::fmt;

use thiserror::Error;

/// Direction of a failed embedded-controller access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcAccess {
    Read,
    Write,
}

impl fmt::Display for EcAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcAccess::Read => write!(f, "read"),
            EcAccess::Write => write!(f, "write"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("error getting hardware information: {0} not available")]
    FirmwareInfoMissing(&'static str),

    #[error("unknown (unsupported) BIOS version {vendor}/{product}/{version}")]
    HardwareUnknown {
        vendor: String,
        product: String,
        version: String,
    },

    #[error("EC {access} of register {reg:#04x} failed: {reason}")]
    EcAccess {
        reg: u8,
        access: EcAccess,
        reason: String,
    },

    #[error("thermal registration failed: {0}")]
    BindFailure(String),

    #[error("listing supported hardware, initialization cancelled")]
    Cancelled,

    #[error("invalid trip point {0}")]
    InvalidTrip(usize),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("platform error: {0}")]
    Platform(String),
}

impl DriverError {
    pub fn ec_read(reg: u8, reason: impl Into<String>) -> Self {
        DriverError::EcAccess {
            reg,
            access: EcAccess::Read,
            reason: reason.into(),
        }
    }

    pub fn ec_write(reg: u8, reason: impl Into<String>) -> Self {
        DriverError::EcAccess {
            reg,
            access: EcAccess::Write,
            reason: reason.into(),
        }
    }
}
