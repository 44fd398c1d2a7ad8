//! In-process thermal host.
//!
//! Stands in for the operating system's thermal layer: it keeps the
//! registered devices, polls the zone at the cadence the driver asks for,
//! evaluates the trips bang-bang style and runs the critical action. The
//! loop is single-threaded; the driver is only ever called from it.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::cli::CriticalAction;
use crate::driver::{Acerhdf, ZONE_NAME};
use crate::errors::DriverError;
use crate::platform::EmbeddedController;
use crate::thermal::{
    CoolingDeviceId, CoolingDeviceOps, DeviceMode, ThermalHost, ThermalZoneDevice, ThermalZoneOps, TripType,
    ZoneParams, GOVERNOR_BANG_BANG, THERMAL_NO_LIMIT,
};

pub const CONTROL_FILE: &str = "control";

/// Governor reported for zones that asked for one this host lacks.
const FALLBACK_GOVERNOR: &str = "none";

/// Granularity of the main loop's sleep.
const LOOP_STEP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct Binding {
    pub trip: usize,
    pub cdev: CoolingDeviceId,
    pub upper: u64,
    pub lower: u64,
    pub weight: u32,
    /// Last state the governor asked for
    pub target: u64,
}

impl Binding {
    fn floor(&self) -> u64 {
        if self.lower == THERMAL_NO_LIMIT {
            0
        } else {
            self.lower
        }
    }

    fn ceiling(&self) -> u64 {
        if self.upper == THERMAL_NO_LIMIT {
            u64::MAX
        } else {
            self.upper.max(self.floor())
        }
    }
}

#[derive(Debug)]
pub struct ZoneState {
    pub name: String,
    pub trips: usize,
    pub governor: String,
    pub polling_delay: u64,
    pub update_requested: bool,
    pub bindings: Vec<Binding>,
}

/// The driver's handle on a zone registered with [`LocalHost`].
pub struct LocalZone(Rc<RefCell<ZoneState>>);

impl ThermalZoneDevice for LocalZone {
    fn governor_name(&self) -> String {
        self.0.borrow().governor.clone()
    }

    fn set_polling_delay(&mut self, delay_ms: u64) {
        self.0.borrow_mut().polling_delay = delay_ms;
    }

    fn request_update(&mut self) {
        self.0.borrow_mut().update_requested = true;
    }

    fn bind_cooling_device(
        &mut self,
        trip: usize,
        cdev: &CoolingDeviceId,
        upper: u64,
        lower: u64,
        weight: u32,
    ) -> Result<(), DriverError> {
        let mut zone = self.0.borrow_mut();
        if trip >= zone.trips {
            return Err(DriverError::InvalidTrip(trip));
        }
        if zone.bindings.iter().any(|b| b.trip == trip && b.cdev == *cdev) {
            return Err(DriverError::BindFailure(format!(
                "{} already bound to trip {} of {}",
                cdev.name, trip, zone.name
            )));
        }

        zone.bindings.push(Binding {
            trip,
            cdev: cdev.clone(),
            upper,
            lower,
            weight,
            target: 0,
        });
        Ok(())
    }

    fn unbind_cooling_device(&mut self, trip: usize, cdev: &CoolingDeviceId) -> Result<(), DriverError> {
        let mut zone = self.0.borrow_mut();
        let before = zone.bindings.len();
        zone.bindings.retain(|b| !(b.trip == trip && b.cdev == *cdev));
        if zone.bindings.len() == before {
            return Err(DriverError::BindFailure(format!(
                "{} is not bound to trip {} of {}",
                cdev.name, trip, zone.name
            )));
        }
        Ok(())
    }
}

/// Registry of the devices the driver announced.
#[derive(Default)]
pub struct LocalHost {
    platform_devices: Vec<String>,
    cooling_devices: Vec<CoolingDeviceId>,
    zones: Vec<Rc<RefCell<ZoneState>>>,
    next_id: usize,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cooling_devices(&self) -> &[CoolingDeviceId] {
        &self.cooling_devices
    }

    fn zone_state(&self, name: &str) -> Option<Rc<RefCell<ZoneState>>> {
        self.zones
            .iter()
            .find(|zone| zone.borrow().name == name)
            .map(Rc::clone)
    }
}

impl ThermalHost for LocalHost {
    type Zone = LocalZone;

    fn register_platform_device(&mut self, name: &str) -> Result<(), DriverError> {
        if self.platform_devices.iter().any(|d| d == name) {
            return Err(DriverError::BindFailure(format!(
                "platform device {} already registered",
                name
            )));
        }
        self.platform_devices.push(name.to_string());
        Ok(())
    }

    fn unregister_platform_device(&mut self, name: &str) {
        self.platform_devices.retain(|d| d != name);
    }

    fn register_cooling_device(&mut self, name: &str) -> Result<CoolingDeviceId, DriverError> {
        if self.cooling_devices.iter().any(|c| c.name == name) {
            return Err(DriverError::BindFailure(format!(
                "cooling device {} already registered",
                name
            )));
        }

        self.next_id += 1;
        let cdev = CoolingDeviceId {
            id: self.next_id,
            name: name.to_string(),
        };
        self.cooling_devices.push(cdev.clone());
        debug!("registered cooling device {}", name);
        Ok(cdev)
    }

    fn unregister_cooling_device(&mut self, cdev: &CoolingDeviceId) {
        self.cooling_devices.retain(|c| c != cdev);
        for zone in &self.zones {
            zone.borrow_mut().bindings.retain(|b| b.cdev != *cdev);
        }
    }

    fn register_zone(
        &mut self,
        name: &str,
        trips: usize,
        params: &ZoneParams,
        polling_delay_ms: u64,
    ) -> Result<LocalZone, DriverError> {
        if self.zone_state(name).is_some() {
            return Err(DriverError::BindFailure(format!("thermal zone {} already registered", name)));
        }

        let governor = if params.governor_name == GOVERNOR_BANG_BANG {
            params.governor_name
        } else {
            warn!("governor {} not available for {}", params.governor_name, name);
            FALLBACK_GOVERNOR
        };

        let state = Rc::new(RefCell::new(ZoneState {
            name: name.to_string(),
            trips,
            governor: governor.to_string(),
            polling_delay: polling_delay_ms,
            update_requested: false,
            bindings: Vec::new(),
        }));
        self.zones.push(Rc::clone(&state));
        debug!("registered thermal zone {} ({} trips, {} ms)", name, trips, polling_delay_ms);
        Ok(LocalZone(state))
    }

    fn unregister_zone(&mut self, zone: LocalZone) {
        self.zones.retain(|z| !Rc::ptr_eq(z, &zone.0));
    }
}

/// Commands accepted through the control file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Enable,
    Disable,
    Suspend,
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "enabled" => Ok(ControlCommand::Enable),
            "disabled" => Ok(ControlCommand::Disable),
            "suspend" | "freeze" => Ok(ControlCommand::Suspend),
            other => Err(format!("unknown control command '{}'", other)),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Enable => write!(f, "enabled"),
            ControlCommand::Disable => write!(f, "disabled"),
            ControlCommand::Suspend => write!(f, "suspend"),
        }
    }
}

/// Hand a command to a running daemon.
pub fn send_command(run_dir: &Path, command: ControlCommand) -> anyhow::Result<()> {
    fs::create_dir_all(run_dir)?;
    fs::write(run_dir.join(CONTROL_FILE), format!("{}\n", command))?;
    Ok(())
}

/// Bang-bang decision for one binding.
fn bang_bang(target: u64, temp: i64, trip_temp: i64, hyst: i64) -> u64 {
    if target == 0 && temp >= trip_temp {
        1
    } else if target == 1 && temp <= trip_temp - hyst {
        0
    } else {
        target
    }
}

/// Polls the driver's zone and routes control commands to it.
pub struct Poller<E: EmbeddedController> {
    driver: Acerhdf<E, LocalZone>,
    zone: Rc<RefCell<ZoneState>>,
    critical_action: CriticalAction,
    critical_fired: bool,
    last_tick: Option<Instant>,
    control_path: PathBuf,
}

impl<E: EmbeddedController> Poller<E> {
    /// Bind the driver's zone to every registered cooling device.
    ///
    /// On failure the driver is removed from `host` before the error is
    /// returned.
    pub fn new(
        mut driver: Acerhdf<E, LocalZone>,
        host: &mut LocalHost,
        critical_action: CriticalAction,
        run_dir: &Path,
    ) -> Result<Self, DriverError> {
        let zone = match host.zone_state(ZONE_NAME) {
            Some(zone) => zone,
            None => {
                driver.remove(host);
                return Err(DriverError::BindFailure("driver zone is not registered".into()));
            }
        };

        let cooling_devices = host.cooling_devices().to_vec();
        for cdev in &cooling_devices {
            if let Err(error) = driver.bind(cdev) {
                driver.remove(host);
                return Err(error);
            }
        }

        Ok(Self {
            driver,
            zone,
            critical_action,
            critical_fired: false,
            last_tick: None,
            control_path: run_dir.join(CONTROL_FILE),
        })
    }

    pub fn driver(&self) -> &Acerhdf<E, LocalZone> {
        &self.driver
    }

    pub fn into_driver(self) -> Acerhdf<E, LocalZone> {
        self.driver
    }

    /// Whether the zone should be evaluated now.
    fn due(&mut self) -> bool {
        let mut zone = self.zone.borrow_mut();
        if zone.update_requested {
            zone.update_requested = false;
            return true;
        }

        zone.polling_delay > 0
            && self
                .last_tick
                .map_or(true, |last| last.elapsed() >= Duration::from_millis(zone.polling_delay))
    }

    /// Evaluate the zone once.
    pub fn tick(&mut self) {
        self.last_tick = Some(Instant::now());

        let temp = match self.driver.get_temp() {
            Ok(temp) => temp,
            Err(error) => {
                warn!("failed to read out thermal zone {}: {}", ZONE_NAME, error);
                return;
            }
        };

        let trips = self.zone.borrow().trips;
        for trip in 0..trips {
            let (kind, trip_temp) = match (self.driver.get_trip_type(trip), self.driver.get_trip_temp(trip)) {
                (Ok(kind), Ok(trip_temp)) => (kind, trip_temp),
                _ => continue,
            };

            match kind {
                TripType::Critical if temp >= trip_temp => self.handle_critical(temp, trip_temp),
                TripType::Critical => {}
                TripType::Active => self.throttle(trip, temp, trip_temp),
            }
        }
    }

    fn throttle(&mut self, trip: usize, temp: i64, trip_temp: i64) {
        let hyst = self.driver.get_trip_hyst(trip).unwrap_or(0);

        let targets: Vec<u64> = {
            let mut zone = self.zone.borrow_mut();
            zone.bindings
                .iter_mut()
                .filter(|b| b.trip == trip)
                .map(|b| {
                    b.target = bang_bang(b.target, temp, trip_temp, hyst).clamp(b.floor(), b.ceiling());
                    trace!("{} -> {} (weight {})", b.cdev.name, b.target, b.weight);
                    b.target
                })
                .collect()
        };

        // Only this driver's cooling device is ever bound.
        for target in targets {
            if let Err(error) = self.driver.set_cur_state(target) {
                warn!("cooling device update failed: {}", error);
            }
        }
    }

    fn handle_critical(&mut self, temp: i64, trip_temp: i64) {
        if self.critical_fired {
            return;
        }
        self.critical_fired = true;

        error!(
            "critical temperature reached ({} C >= {} C), {}",
            temp,
            trip_temp,
            match self.critical_action {
                CriticalAction::Shutdown => "shutting down",
                CriticalAction::Log => "no action configured",
            }
        );

        if self.critical_action == CriticalAction::Shutdown {
            match Command::new("systemctl").arg("poweroff").status() {
                Ok(status) if status.success() => {}
                Ok(status) => error!("poweroff request failed: {}", status),
                Err(error) => error!("failed to run systemctl: {}", error),
            }
        }
    }

    /// Consume a pending control command, if any.
    pub fn poll_control(&mut self) {
        let content = match fs::read_to_string(&self.control_path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return,
            Err(error) => {
                warn!("cannot read {}: {}", self.control_path.display(), error);
                return;
            }
        };
        if let Err(error) = fs::remove_file(&self.control_path) {
            warn!("cannot remove {}: {}", self.control_path.display(), error);
        }

        match content.parse::<ControlCommand>() {
            Ok(command) => {
                info!("control command: {}", command);
                self.dispatch(command);
            }
            Err(error) => warn!("{}", error),
        }
    }

    fn dispatch(&mut self, command: ControlCommand) {
        let result = match command {
            ControlCommand::Enable => self.driver.set_mode(DeviceMode::Enabled),
            ControlCommand::Disable => self.driver.set_mode(DeviceMode::Disabled),
            ControlCommand::Suspend => {
                self.driver.suspend();
                Ok(())
            }
        };
        if let Err(error) = result {
            warn!("control command {} failed: {}", command, error);
        }
    }

    /// Run until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            self.poll_control();
            if self.due() {
                self.tick();
            }
            thread::sleep(LOOP_STEP);
        }
        info!("exit requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::FakeEc;
    use crate::driver::ControlMode;
    use crate::params::{Params, SharedParams};
    use crate::profile::tests::FakeDmi;
    use tempfile::TempDir;

    const FANREG: usize = 0x4f;
    const TEMPREG: usize = 0x58;

    fn start(ec: &FakeEc, params: Params, run_dir: &Path) -> (LocalHost, Poller<FakeEc>) {
        let mut host = LocalHost::new();
        let driver = Acerhdf::probe(
            ec.clone(),
            &FakeDmi::predator(),
            SharedParams::new(params),
            &mut host,
        )
        .unwrap();
        let poller = Poller::new(driver, &mut host, CriticalAction::Log, run_dir).unwrap();
        (host, poller)
    }

    fn set_temp(ec: &FakeEc, temp: u8) {
        ec.0.borrow_mut().registers[TEMPREG] = temp;
    }

    #[test]
    fn poller_binds_driver_fan_to_active_trip() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(45);
        let (host, poller) = start(&ec, Params::default(), temp_dir.path());

        let zone = poller.zone.borrow();
        assert_eq!(zone.governor, GOVERNOR_BANG_BANG);
        assert_eq!(zone.bindings.len(), 1);
        assert_eq!(zone.bindings[0].trip, 0);
        assert_eq!(zone.bindings[0].cdev, host.cooling_devices()[0]);
    }

    #[test]
    fn tick_drives_the_fan() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(70);
        let (_host, mut poller) = start(&ec, Params::default(), temp_dir.path());

        assert!(poller.due());
        poller.tick();
        assert_eq!(ec.writes(), vec![(FANREG as u8, 4)]);
        assert!(!poller.due());
    }

    #[test]
    fn bang_bang_target_follows_hysteresis() {
        assert_eq!(bang_bang(0, 62, 60, 5), 1);
        assert_eq!(bang_bang(1, 57, 60, 5), 1);
        assert_eq!(bang_bang(1, 55, 60, 5), 0);
        assert_eq!(bang_bang(0, 59, 60, 5), 0);
    }

    #[test]
    fn binding_target_is_tracked_per_tick() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(62);
        let params = Params {
            fanon: 60,
            fanoff: 55,
            ..Params::default()
        };
        let (_host, mut poller) = start(&ec, params, temp_dir.path());

        poller.tick();
        assert_eq!(poller.zone.borrow().bindings[0].target, 1);
        set_temp(&ec, 54);
        poller.tick();
        assert_eq!(poller.zone.borrow().bindings[0].target, 0);
        assert_eq!(ec.writes().len(), 2);
    }

    #[test]
    fn disabled_zone_is_not_polled_until_reenabled() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(50);
        let (_host, mut poller) = start(&ec, Params::default(), temp_dir.path());

        send_command(temp_dir.path(), ControlCommand::Disable).unwrap();
        poller.poll_control();
        assert_eq!(poller.driver().mode(), ControlMode::Bios);
        assert!(!temp_dir.path().join(CONTROL_FILE).exists());
        assert!(!poller.due());

        send_command(temp_dir.path(), ControlCommand::Enable).unwrap();
        poller.poll_control();
        assert_eq!(poller.driver().mode(), ControlMode::Kernel);
        assert!(poller.due());
    }

    #[test]
    fn suspend_command_returns_fan_to_bios() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(50);
        let (_host, mut poller) = start(&ec, Params::default(), temp_dir.path());

        send_command(temp_dir.path(), ControlCommand::Suspend).unwrap();
        poller.poll_control();
        assert_eq!(ec.writes(), vec![(FANREG as u8, 5)]);
        assert_eq!(poller.driver().mode(), ControlMode::Kernel);
    }

    #[test]
    fn garbage_control_file_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(50);
        let (_host, mut poller) = start(&ec, Params::default(), temp_dir.path());

        fs::write(temp_dir.path().join(CONTROL_FILE), "turbo\n").unwrap();
        poller.poll_control();
        assert!(!temp_dir.path().join(CONTROL_FILE).exists());
        assert_eq!(poller.driver().mode(), ControlMode::Kernel);
    }

    #[test]
    fn critical_trip_fires_once() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(95);
        let (_host, mut poller) = start(&ec, Params::default(), temp_dir.path());

        poller.tick();
        assert!(poller.critical_fired);
        poller.tick();
        assert!(poller.critical_fired);
    }

    #[test]
    fn failed_temperature_read_skips_tick() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(50);
        let (_host, mut poller) = start(&ec, Params::default(), temp_dir.path());
        ec.fail_read(TEMPREG as u8);

        poller.tick();
        assert!(ec.writes().is_empty());
        assert_eq!(poller.driver().mode(), ControlMode::Kernel);
    }

    #[test]
    fn control_commands_parse() {
        assert_eq!("enabled\n".parse::<ControlCommand>(), Ok(ControlCommand::Enable));
        assert_eq!("disabled".parse::<ControlCommand>(), Ok(ControlCommand::Disable));
        assert_eq!("freeze".parse::<ControlCommand>(), Ok(ControlCommand::Suspend));
        assert!("on".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn unknown_governor_gets_fallback() {
        let mut host = LocalHost::new();
        let params = ZoneParams {
            governor_name: "step_wise",
        };
        let zone = host.register_zone("cpu", 1, &params, 0).unwrap();
        assert_eq!(zone.governor_name(), FALLBACK_GOVERNOR);
    }

    #[test]
    fn duplicate_registrations_are_refused() {
        let mut host = LocalHost::new();
        host.register_platform_device("acerhdf").unwrap();
        assert!(host.register_platform_device("acerhdf").is_err());

        host.register_cooling_device("acerhdf-fan").unwrap();
        assert!(host.register_cooling_device("acerhdf-fan").is_err());
    }

    #[test]
    fn failed_bind_tears_the_driver_down() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(50);
        let mut host = LocalHost::new();
        let driver = Acerhdf::probe(
            ec.clone(),
            &FakeDmi::predator(),
            SharedParams::new(Params::default()),
            &mut host,
        )
        .unwrap();

        let cdev = host.cooling_devices()[0].clone();
        host.zone_state(ZONE_NAME).unwrap().borrow_mut().bindings.push(Binding {
            trip: 0,
            cdev,
            upper: THERMAL_NO_LIMIT,
            lower: THERMAL_NO_LIMIT,
            weight: 0,
            target: 0,
        });

        let result = Poller::new(driver, &mut host, CriticalAction::Log, temp_dir.path());
        assert!(matches!(result, Err(DriverError::BindFailure(_))));
        assert!(host.cooling_devices().is_empty());
        assert!(host.zones.is_empty());
        assert!(host.platform_devices.is_empty());
        assert_eq!(ec.writes(), vec![(FANREG as u8, 5)]);
    }

    #[test]
    fn remove_leaves_host_empty() {
        let temp_dir = TempDir::new().unwrap();
        let ec = FakeEc::new(50);
        let (mut host, poller) = start(&ec, Params::default(), temp_dir.path());

        poller.into_driver().remove(&mut host);
        assert!(host.cooling_devices().is_empty());
        assert!(host.zones.is_empty());
        assert!(host.platform_devices.is_empty());
        assert_eq!(ec.writes(), vec![(FANREG as u8, 5)]);
    }
}
