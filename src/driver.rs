//! The fan driver: closed-loop control of the EC fan register, driven by the
//! polls of a thermal host.
//!
//! The host's cooling-state request is only used as a clock. Each call to
//! [`CoolingDeviceOps::set_cur_state`] samples the EC temperature, averages
//! it over the sample ring and writes the scheduled fan state. Any EC error
//! hands the fan back to the BIOS and stops polling.

use log::{debug, error, info, trace, warn};

use crate::errors::DriverError;
use crate::fan::{self, FAN_STATE_BIOS, MAX_FAN_STATE};
use crate::params::{SharedParams, MAX_FANON, MAX_INTERVAL};
use crate::platform::{EmbeddedController, FirmwareInfo};
use crate::profile::{self, ControlConfig};
use crate::samples::SampleRing;
use crate::thermal::{
    CoolingDeviceId, CoolingDeviceOps, DeviceMode, ThermalHost, ThermalZoneDevice, ThermalZoneOps,
    TripType, ZoneParams, GOVERNOR_BANG_BANG, THERMAL_NO_LIMIT, THERMAL_WEIGHT_DEFAULT,
};

pub const PLATFORM_DEVICE_NAME: &str = "acerhdf";
pub const ZONE_NAME: &str = "acerhdf";
pub const COOLING_DEVICE_NAME: &str = "acerhdf-fan";

/// The CPU is rated for 100°C; the host treats 89°C as critical.
pub const TEMP_CRIT: i64 = 89;

const TRIP_COUNT: usize = 2;
const TRIP_ACTIVE: usize = 0;
const TRIP_CRITICAL: usize = 1;

const ZONE_PARAMS: ZoneParams = ZoneParams {
    governor_name: GOVERNOR_BANG_BANG,
};

/// Who drives the fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// The driver writes scheduled fan states on every poll.
    Kernel,
    /// The firmware regulates the fan; the driver stays inert.
    Bios,
}

fn interval_ms(interval: u32) -> u64 {
    u64::from(interval) * 1000
}

pub struct Acerhdf<E: EmbeddedController, Z: ThermalZoneDevice> {
    ec: E,
    ctrl: ControlConfig,
    params: SharedParams,
    samples: SampleRing,
    mode: ControlMode,
    fanstate: u8,
    prev_interval: u32,
    cooling: CoolingDeviceId,
    zone: Z,
}

impl<E: EmbeddedController, Z: ThermalZoneDevice> Acerhdf<E, Z> {
    /// Identify the hardware and register the fan and its zone with `host`.
    ///
    /// On failure everything registered so far is unregistered again.
    pub fn probe<H>(
        ec: E,
        info: &dyn FirmwareInfo,
        params: SharedParams,
        host: &mut H,
    ) -> Result<Self, DriverError>
    where
        H: ThermalHost<Zone = Z>,
    {
        let snapshot = params.snapshot();
        let hardware = profile::check_hardware(info, &snapshot)?;

        let mode = if snapshot.kernelmode && !hardware.forced {
            ControlMode::Kernel
        } else {
            ControlMode::Bios
        };
        if mode == ControlMode::Bios {
            info!("Fan control off, to enable do:");
            info!("acerhdf ctl mode enabled");
        }

        host.register_platform_device(PLATFORM_DEVICE_NAME)?;

        let (cooling, zone) = match register_thermal(host, mode, snapshot.interval) {
            Ok(registered) => registered,
            Err(error) => {
                host.unregister_platform_device(PLATFORM_DEVICE_NAME);
                return Err(error);
            }
        };

        Ok(Self {
            ec,
            ctrl: hardware.config,
            params,
            samples: SampleRing::new(),
            mode,
            fanstate: FAN_STATE_BIOS,
            prev_interval: 0,
            cooling,
            zone,
        })
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn control_config(&self) -> &ControlConfig {
        &self.ctrl
    }

    pub fn cooling_device(&self) -> &CoolingDeviceId {
        &self.cooling
    }

    /// Last state written to the fan register.
    pub fn fanstate(&self) -> u8 {
        self.fanstate
    }

    pub fn samples(&self) -> &SampleRing {
        &self.samples
    }

    fn read_temp(&mut self) -> Result<i32, DriverError> {
        self.ec.read(self.ctrl.tempreg).map(i32::from)
    }

    fn read_fanstate(&mut self) -> Result<u8, DriverError> {
        self.ec.read(self.ctrl.fanreg)
    }

    fn change_fanstate(&mut self, state: u8) -> Result<(), DriverError> {
        self.fanstate = state;
        if self.params.read(|p| p.debug) {
            info!("Fan speed: {}", state);
        } else {
            debug!("Fan speed: {}", state);
        }

        self.ec.write(self.ctrl.fanreg, state)
    }

    /// Repair out-of-range parameters and follow interval changes.
    fn check_param(&mut self) {
        let (interval, verbose) = self.params.update(|p| {
            if p.fanon > MAX_FANON {
                error!("fanon temperature too high, set to {}", MAX_FANON);
                p.fanon = MAX_FANON;
            }
            (p.interval, p.verbose)
        });

        if self.mode == ControlMode::Kernel && self.prev_interval != interval {
            let interval = self.params.update(|p| {
                if p.interval > MAX_INTERVAL {
                    error!("interval too high, set to {}", MAX_INTERVAL);
                    p.interval = MAX_INTERVAL;
                }
                p.interval
            });
            if verbose > 0 {
                info!("interval changed to: {}", interval);
            }
            self.zone.set_polling_delay(interval_ms(interval));
            self.prev_interval = interval;
        }
    }

    fn revert_to_bios_mode(&mut self) {
        if let Err(error) = self.change_fanstate(FAN_STATE_BIOS) {
            error!("could not return the fan to the BIOS: {}", error);
        }
        self.mode = ControlMode::Bios;
        self.zone.set_polling_delay(0);
        info!("kernel mode fan control OFF");
    }

    fn enable_kernelmode(&mut self) {
        self.mode = ControlMode::Kernel;

        let interval = self.params.read(|p| p.interval);
        self.zone.set_polling_delay(interval_ms(interval));
        self.zone.request_update();
        info!("kernel mode fan control ON");
    }

    /// Hand the fan to the BIOS before the machine sleeps.
    pub fn suspend(&mut self) {
        if self.mode == ControlMode::Kernel {
            if let Err(error) = self.change_fanstate(FAN_STATE_BIOS) {
                warn!("could not return the fan to the BIOS before suspend: {}", error);
            }
        }

        if self.params.read(|p| p.verbose) > 0 {
            info!("going suspend");
        }
    }

    /// Return the fan to the BIOS and unregister from `host`.
    pub fn remove<H>(mut self, host: &mut H)
    where
        H: ThermalHost<Zone = Z>,
    {
        if let Err(error) = self.change_fanstate(FAN_STATE_BIOS) {
            error!("could not return the fan to the BIOS: {}", error);
        }

        let cooling = self.cooling.clone();
        if let Err(error) = self.unbind(&cooling) {
            warn!("{}", error);
        }

        let Self { cooling, zone, .. } = self;
        host.unregister_cooling_device(&cooling);
        host.unregister_zone(zone);
        host.unregister_platform_device(PLATFORM_DEVICE_NAME);
    }
}

fn register_thermal<H: ThermalHost>(
    host: &mut H,
    mode: ControlMode,
    interval: u32,
) -> Result<(CoolingDeviceId, H::Zone), DriverError> {
    let cooling = host.register_cooling_device(COOLING_DEVICE_NAME)?;

    let polling = match mode {
        ControlMode::Kernel => interval_ms(interval),
        ControlMode::Bios => 0,
    };
    let zone = match host.register_zone(ZONE_NAME, TRIP_COUNT, &ZONE_PARAMS, polling) {
        Ok(zone) => zone,
        Err(error) => {
            host.unregister_cooling_device(&cooling);
            return Err(error);
        }
    };

    let governor = zone.governor_name();
    if governor != ZONE_PARAMS.governor_name {
        error!(
            "Didn't get thermal governor {}, perhaps not available in the thermal host.",
            ZONE_PARAMS.governor_name
        );
        host.unregister_zone(zone);
        host.unregister_cooling_device(&cooling);
        return Err(DriverError::BindFailure(format!(
            "governor {} attached instead of {}",
            governor, ZONE_PARAMS.governor_name
        )));
    }

    Ok((cooling, zone))
}

impl<E: EmbeddedController, Z: ThermalZoneDevice> ThermalZoneOps for Acerhdf<E, Z> {
    /// Live EC reading; also the hook where parameter changes take effect.
    fn get_temp(&mut self) -> Result<i64, DriverError> {
        self.check_param();
        self.read_temp().map(i64::from)
    }

    fn get_mode(&self) -> DeviceMode {
        if self.params.read(|p| p.verbose) > 0 {
            info!("kernel mode fan control {}", self.mode == ControlMode::Kernel);
        }

        match self.mode {
            ControlMode::Kernel => DeviceMode::Enabled,
            ControlMode::Bios => DeviceMode::Disabled,
        }
    }

    fn set_mode(&mut self, mode: DeviceMode) -> Result<(), DriverError> {
        match (mode, self.mode) {
            (DeviceMode::Disabled, ControlMode::Kernel) => self.revert_to_bios_mode(),
            (DeviceMode::Enabled, ControlMode::Bios) => self.enable_kernelmode(),
            _ => {}
        }
        Ok(())
    }

    fn get_trip_type(&self, trip: usize) -> Result<TripType, DriverError> {
        match trip {
            TRIP_ACTIVE => Ok(TripType::Active),
            TRIP_CRITICAL => Ok(TripType::Critical),
            _ => Err(DriverError::InvalidTrip(trip)),
        }
    }

    fn get_trip_temp(&self, trip: usize) -> Result<i64, DriverError> {
        match trip {
            TRIP_ACTIVE => Ok(i64::from(self.params.read(|p| p.fanon))),
            TRIP_CRITICAL => Ok(TEMP_CRIT),
            _ => Err(DriverError::InvalidTrip(trip)),
        }
    }

    fn get_trip_hyst(&self, trip: usize) -> Result<i64, DriverError> {
        if trip != TRIP_ACTIVE {
            return Err(DriverError::InvalidTrip(trip));
        }
        Ok(self
            .params
            .read(|p| i64::from(p.fanon) - i64::from(p.fanoff)))
    }

    fn get_crit_temp(&self) -> i64 {
        TEMP_CRIT
    }

    fn bind(&mut self, cdev: &CoolingDeviceId) -> Result<(), DriverError> {
        if *cdev != self.cooling {
            return Ok(());
        }

        self.zone
            .bind_cooling_device(
                TRIP_ACTIVE,
                cdev,
                THERMAL_NO_LIMIT,
                THERMAL_NO_LIMIT,
                THERMAL_WEIGHT_DEFAULT,
            )
            .map_err(|error| {
                error!("error binding cooling dev: {}", error);
                DriverError::BindFailure(format!("binding {} failed", cdev.name))
            })
    }

    fn unbind(&mut self, cdev: &CoolingDeviceId) -> Result<(), DriverError> {
        if *cdev != self.cooling {
            return Ok(());
        }

        self.zone
            .unbind_cooling_device(TRIP_ACTIVE, cdev)
            .map_err(|error| {
                error!("error unbinding cooling dev: {}", error);
                DriverError::BindFailure(format!("unbinding {} failed", cdev.name))
            })
    }
}

impl<E: EmbeddedController, Z: ThermalZoneDevice> CoolingDeviceOps for Acerhdf<E, Z> {
    fn get_max_state(&self) -> u64 {
        u64::from(MAX_FAN_STATE)
    }

    fn get_cur_state(&mut self) -> Result<u64, DriverError> {
        self.read_fanstate().map(u64::from)
    }

    /// One control tick. `requested` is ignored: the state comes from the
    /// averaged EC temperature.
    fn set_cur_state(&mut self, requested: u64) -> Result<(), DriverError> {
        if self.mode != ControlMode::Kernel {
            return Ok(());
        }

        match self.read_temp() {
            Ok(temp) => self.samples.push(temp),
            Err(error) => {
                self.samples.advance();
                error!("error reading temperature, hand off control to BIOS");
                self.revert_to_bios_mode();
                return Err(error);
            }
        }
        let avg = self.samples.average();

        let current = match self.read_fanstate() {
            Ok(state) => state,
            Err(error) => {
                error!("error reading fan state, hand off control to BIOS");
                self.revert_to_bios_mode();
                return Err(error);
            }
        };
        if self.params.read(|p| p.debug) {
            info!("AVG Temperature: {}", avg);
        }

        let state = fan::schedule(avg);
        trace!("requested {}, fan at {}, scheduled {}", requested, current, state);

        if let Err(error) = self.change_fanstate(state) {
            error!("error writing fan state, hand off control to BIOS");
            self.revert_to_bios_mode();
            return Err(error);
        }
        Ok(())
    }
}
