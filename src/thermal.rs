//! The contract between the fan driver and the thermal host that polls it.

use std::fmt;

use crate::errors::DriverError;

/// Binding limit meaning "the whole state range of the cooling device".
pub const THERMAL_NO_LIMIT: u64 = u64::MAX;

pub const THERMAL_WEIGHT_DEFAULT: u32 = 0;

pub const GOVERNOR_BANG_BANG: &str = "bang_bang";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripType {
    Active,
    Critical,
}

/// Whether the host lets the driver regulate the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Enabled,
    Disabled,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Enabled => write!(f, "enabled"),
            DeviceMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Handle to a registered cooling device, compared by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoolingDeviceId {
    pub id: usize,
    pub name: String,
}

/// Parameters requested when registering a zone.
#[derive(Debug, Clone)]
pub struct ZoneParams {
    pub governor_name: &'static str,
}

/// A registered thermal zone as seen by the driver.
pub trait ThermalZoneDevice {
    /// Governor the host actually attached.
    fn governor_name(&self) -> String;

    /// Milliseconds between polls; 0 stops polling.
    fn set_polling_delay(&mut self, delay_ms: u64);

    /// Ask the host to evaluate the zone as soon as possible.
    fn request_update(&mut self);

    fn bind_cooling_device(
        &mut self,
        trip: usize,
        cdev: &CoolingDeviceId,
        upper: u64,
        lower: u64,
        weight: u32,
    ) -> Result<(), DriverError>;

    fn unbind_cooling_device(&mut self, trip: usize, cdev: &CoolingDeviceId) -> Result<(), DriverError>;
}

/// The thermal subsystem the driver registers with.
pub trait ThermalHost {
    type Zone: ThermalZoneDevice;

    fn register_platform_device(&mut self, name: &str) -> Result<(), DriverError>;

    fn unregister_platform_device(&mut self, name: &str);

    fn register_cooling_device(&mut self, name: &str) -> Result<CoolingDeviceId, DriverError>;

    fn unregister_cooling_device(&mut self, cdev: &CoolingDeviceId);

    fn register_zone(
        &mut self,
        name: &str,
        trips: usize,
        params: &ZoneParams,
        polling_delay_ms: u64,
    ) -> Result<Self::Zone, DriverError>;

    fn unregister_zone(&mut self, zone: Self::Zone);
}

/// Callbacks the host invokes on a zone.
pub trait ThermalZoneOps {
    fn get_temp(&mut self) -> Result<i64, DriverError>;
    fn get_mode(&self) -> DeviceMode;
    fn set_mode(&mut self, mode: DeviceMode) -> Result<(), DriverError>;
    fn get_trip_type(&self, trip: usize) -> Result<TripType, DriverError>;
    fn get_trip_temp(&self, trip: usize) -> Result<i64, DriverError>;
    fn get_trip_hyst(&self, trip: usize) -> Result<i64, DriverError>;
    fn get_crit_temp(&self) -> i64;
    fn bind(&mut self, cdev: &CoolingDeviceId) -> Result<(), DriverError>;
    fn unbind(&mut self, cdev: &CoolingDeviceId) -> Result<(), DriverError>;
}

/// Callbacks the host invokes on a cooling device.
pub trait CoolingDeviceOps {
    fn get_max_state(&self) -> u64;
    fn get_cur_state(&mut self) -> Result<u64, DriverError>;
    fn set_cur_state(&mut self, state: u64) -> Result<(), DriverError>;
}
