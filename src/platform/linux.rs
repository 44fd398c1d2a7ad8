use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::DriverError;
use super::{DmiField, EmbeddedController, FirmwareInfo};

const EC_IO_PATH: &str = "/sys/kernel/debug/ec/ec0/io";
const DMI_BASE: &str = "/sys/class/dmi/id";

/// Embedded controller backed by the `ec_sys` debugfs file.
///
/// Register `N` is the byte at offset `N` of `ec0/io`. Writing needs the
/// module loaded with `write_support=1`.
pub struct DebugfsEc {
    io_path: PathBuf,
}

impl DebugfsEc {
    /// Create a port on the default debugfs path.
    pub fn new() -> Self {
        Self {
            io_path: PathBuf::from(EC_IO_PATH),
        }
    }

    /// Create a port on a custom file (useful for testing).
    #[cfg(test)]
    fn with_path(io_path: PathBuf) -> Self {
        Self { io_path }
    }
}

impl EmbeddedController for DebugfsEc {
    fn read(&mut self, reg: u8) -> Result<u8, DriverError> {
        let mut file = File::open(&self.io_path)
            .map_err(|error| map_ec_error(error, &self.io_path, reg, false))?;

        let mut byte = [0u8; 1];
        file.seek(SeekFrom::Start(u64::from(reg)))
            .and_then(|_| file.read_exact(&mut byte))
            .map_err(|error| map_ec_error(error, &self.io_path, reg, false))?;

        Ok(byte[0])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), DriverError> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.io_path)
            .map_err(|error| map_ec_error(error, &self.io_path, reg, true))?;

        file.seek(SeekFrom::Start(u64::from(reg)))
            .and_then(|_| file.write_all(&[value]))
            .map_err(|error| map_ec_error(error, &self.io_path, reg, true))?;

        Ok(())
    }
}

/// Firmware identity read from `/sys/class/dmi/id`.
pub struct SysfsDmi {
    base: PathBuf,
}

impl SysfsDmi {
    pub fn new() -> Self {
        Self {
            base: PathBuf::from(DMI_BASE),
        }
    }

    #[cfg(test)]
    fn with_base(base: PathBuf) -> Self {
        Self { base }
    }
}

impl FirmwareInfo for SysfsDmi {
    fn get(&self, field: DmiField) -> Option<String> {
        fs::read_to_string(self.base.join(field.name()))
            .ok()
            .map(|content| content.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Map an `std::io::Error` from the EC file to a `DriverError`.
///
/// Permission problems get a hint; other failures become EC access errors
/// for the register.
fn map_ec_error(error: std::io::Error, path: &Path, reg: u8, write: bool) -> DriverError {
    match error.kind() {
        ErrorKind::PermissionDenied => DriverError::PermissionDenied(format!(
            "{}: {} (run as root; writing needs ec_sys write_support=1)",
            path.display(),
            error
        )),
        ErrorKind::NotFound => DriverError::Platform(format!(
            "{} not found: load ec_sys and mount debugfs",
            path.display()
        )),
        _ if write => DriverError::ec_write(reg, error.to_string()),
        _ => DriverError::ec_read(reg, error.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
