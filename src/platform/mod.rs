#[cfg(target_os = "linux")]
mod linux;

use crate::errors::DriverError;

/// Byte-addressed access to the embedded controller's register file.
pub trait EmbeddedController {
    /// Read one register.
    fn read(&mut self, reg: u8) -> Result<u8, DriverError>;

    /// Write one register.
    fn write(&mut self, reg: u8, value: u8) -> Result<(), DriverError>;
}

/// Machine identity fields published by the firmware tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiField {
    SysVendor,
    BiosVersion,
    ProductName,
}

impl DmiField {
    pub fn name(self) -> &'static str {
        match self {
            DmiField::SysVendor => "sys_vendor",
            DmiField::BiosVersion => "bios_version",
            DmiField::ProductName => "product_name",
        }
    }
}

/// Source of firmware identity strings.
pub trait FirmwareInfo {
    /// `None` when the firmware does not publish the field.
    fn get(&self, field: DmiField) -> Option<String>;
}

/// Create the platform's embedded-controller port.
pub fn create_ec() -> Box<dyn EmbeddedController> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::DebugfsEc::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        compile_error!("Unsupported platform: only Linux exposes the EC through ec_sys");
    }
}

/// Create the platform's firmware identity source.
pub fn create_firmware_info() -> Box<dyn FirmwareInfo> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::SysfsDmi::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        compile_error!("Unsupported platform: only Linux is supported");
    }
}

impl<T: EmbeddedController + ?Sized> EmbeddedController for Box<T> {
    fn read(&mut self, reg: u8) -> Result<u8, DriverError> {
        (**self).read(reg)
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), DriverError> {
        (**self).write(reg, value)
    }
}
