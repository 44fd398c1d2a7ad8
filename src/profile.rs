//! Supported hardware and the EC layout each model uses.
//!
//! Rows are matched in declaration order and every field is a prefix match,
//! so a broad row placed before a narrow one shadows it. Keep more specific
//! rows first.

use log::info;

use crate::errors::DriverError;
use crate::params::Params;
use crate::platform::{DmiField, FirmwareInfo};

pub const DRIVER_VERSION: &str = "0.2 beta";

/// Fan command bytes: switch the fan off, or let the BIOS regulate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanCmd {
    pub cmd_off: u8,
    pub cmd_auto: u8,
}

/// Register and value that disable the fan in manual mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualCmd {
    pub mreg: u8,
    pub moff: u8,
}

pub const DEFAULT_MANUAL_CMD: ManualCmd = ManualCmd {
    mreg: 0x94,
    moff: 0xff,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosSettings {
    pub vendor: &'static str,
    pub product: &'static str,
    pub version: &'static str,
    pub fanreg: u8,
    pub tempreg: u8,
    pub cmd: FanCmd,
    pub mcmd: ManualCmd,
    pub mcmd_enable: bool,
}

/// Register addresses and values for the known BIOS versions.
///
/// The all-empty row terminates the table.
pub static BIOS_TABLE: &[BiosSettings] = &[
    // Acer Predator PH517-51/Cayman_CFS, BIOS V1.06 05/03/2018
    BiosSettings {
        vendor: "Acer",
        product: "Predator PH517-51",
        version: "V1.06",
        fanreg: 0x4f,
        tempreg: 0x58,
        cmd: FanCmd {
            cmd_off: 0x14,
            cmd_auto: 0x04,
        },
        mcmd: DEFAULT_MANUAL_CMD,
        mcmd_enable: true,
    },
    BiosSettings {
        vendor: "",
        product: "",
        version: "",
        fanreg: 0,
        tempreg: 0,
        cmd: FanCmd {
            cmd_off: 0,
            cmd_auto: 0,
        },
        mcmd: ManualCmd { mreg: 0, moff: 0 },
        mcmd_enable: false,
    },
];

/// The control settings copied out of the matched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlConfig {
    pub fanreg: u8,
    pub tempreg: u8,
    pub cmd: FanCmd,
    pub mcmd: ManualCmd,
    pub mcmd_enable: bool,
}

impl From<&BiosSettings> for ControlConfig {
    fn from(row: &BiosSettings) -> Self {
        Self {
            fanreg: row.fanreg,
            tempreg: row.tempreg,
            cmd: row.cmd,
            mcmd: row.mcmd,
            mcmd_enable: row.mcmd_enable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub vendor: String,
    pub product: String,
    pub version: String,
}

impl Identity {
    /// Read all three fields; any missing one is fatal.
    pub fn read(info: &dyn FirmwareInfo) -> Result<Self, DriverError> {
        let fetch = |field: DmiField| {
            info.get(field)
                .ok_or(DriverError::FirmwareInfoMissing(field.name()))
        };

        Ok(Self {
            vendor: fetch(DmiField::SysVendor)?,
            version: fetch(DmiField::BiosVersion)?,
            product: fetch(DmiField::ProductName)?,
        })
    }
}

/// Outcome of a successful hardware check.
#[derive(Debug, Clone)]
pub struct HardwareMatch {
    pub identity: Identity,
    pub profile: &'static BiosSettings,
    pub config: ControlConfig,
    /// An override replaced part of the identity; the fan stays with the BIOS.
    pub forced: bool,
}

/// Rows before the terminator.
pub fn supported() -> impl Iterator<Item = &'static BiosSettings> {
    BIOS_TABLE.iter().take_while(|row| !row.vendor.is_empty())
}

/// First row whose fields are all prefixes of the observed identity.
pub fn find_profile(identity: &Identity) -> Option<&'static BiosSettings> {
    supported().find(|row| {
        identity.vendor.starts_with(row.vendor)
            && identity.product.starts_with(row.product)
            && identity.version.starts_with(row.version)
    })
}

pub fn format_table() -> Vec<String> {
    let rule = "-".repeat(51);
    let mut lines = vec!["List of supported Manufacturer/Model/BIOS:".to_string(), rule.clone()];
    lines.extend(
        supported().map(|row| format!("{:<13} | {:<17} | {:<10}", row.vendor, row.product, row.version)),
    );
    lines.push(rule);
    lines
}

/// Identify the machine and select its control settings.
pub fn check_hardware(info: &dyn FirmwareInfo, params: &Params) -> Result<HardwareMatch, DriverError> {
    let mut identity = Identity::read(info)?;

    info!("Acer Predator Helios 500 fan driver, v.{}", DRIVER_VERSION);

    if params.list_supported {
        return Err(DriverError::Cancelled);
    }

    let mut forced = false;
    if !params.force_bios.is_empty() {
        identity.version = params.force_bios.clone();
        info!("forcing BIOS version: {}", identity.version);
        forced = true;
    }
    if !params.force_product.is_empty() {
        identity.product = params.force_product.clone();
        info!("forcing BIOS product: {}", identity.product);
        forced = true;
    }

    if params.verbose > 0 {
        info!(
            "BIOS info: {} {}, product: {}",
            identity.vendor, identity.version, identity.product
        );
    }

    let profile = find_profile(&identity).ok_or_else(|| DriverError::HardwareUnknown {
        vendor: identity.vendor.clone(),
        product: identity.product.clone(),
        version: identity.version.clone(),
    })?;

    Ok(HardwareMatch {
        config: ControlConfig::from(profile),
        identity,
        profile,
        forced,
    })
}
