use std::fmt;

/// Highest state advertised by the cooling device.
pub const MAX_FAN_STATE: u8 = 11;

/// The schedule never asks for less than this.
pub const MIN_FAN_SPEED: u8 = 4;

/// Writing this state hands the fan back to the firmware's own regulation.
pub const FAN_STATE_BIOS: u8 = 5;

/// Upper bounds (exclusive, °C) of each scheduled state below the maximum.
const SCHEDULE: [(i32, u8); 8] = [
    (40, 3),
    (45, 4),
    (48, 5),
    (50, 6),
    (55, 7),
    (60, 8),
    (65, 9),
    (70, 10),
];

/// Map a smoothed CPU temperature (°C) to a fan state.
///
/// The result is monotonic in `temp` and always lies within
/// `MIN_FAN_SPEED..=MAX_FAN_STATE`.
pub fn schedule(temp: i32) -> u8 {
    let state = SCHEDULE
        .iter()
        .find(|(upper, _)| temp < *upper)
        .map(|(_, state)| *state)
        .unwrap_or(MAX_FAN_STATE);

    state.max(MIN_FAN_SPEED)
}

/// One observation of the EC fan and temperature registers.
#[derive(Debug, Clone, Copy)]
pub struct FanSnapshot {
    /// Live CPU temperature in °C
    pub temperature: u8,
    /// Raw content of the fan register
    pub fan_state: u8,
    /// Moving average over the sample ring, if one is kept
    pub smoothed: Option<i32>,
}

impl FanSnapshot {
    /// The state the schedule would write for this observation.
    pub fn scheduled(&self) -> u8 {
        schedule(self.smoothed.unwrap_or(i32::from(self.temperature)))
    }
}

impl fmt::Display for FanSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\u{00B0}C, fan state {}", self.temperature, self.fan_state)?;
        if let Some(avg) = self.smoothed {
            write!(f, " (avg {}\u{00B0}C)", avg)?;
        }
        write!(f, " \u{2192} scheduled {}", self.scheduled())
    }
}
