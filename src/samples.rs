/// Number of temperature samples averaged, one per poll.
pub const TEMPERATURE_SAMPLES: usize = 10;

/// Fixed-size ring of recent temperature readings.
///
/// The ring starts zero-filled and the average always divides by the full
/// capacity, so the first few polls report a low temperature and the fan
/// spins up gradually.
#[derive(Debug, Clone)]
pub struct SampleRing {
    samples: [i32; TEMPERATURE_SAMPLES],
    cursor: usize,
}

impl SampleRing {
    pub fn new() -> Self {
        Self {
            samples: [0; TEMPERATURE_SAMPLES],
            cursor: 0,
        }
    }

    /// Store a reading at the cursor and advance.
    pub fn push(&mut self, temp: i32) {
        self.samples[self.cursor] = temp;
        self.advance();
    }

    /// Advance past the current slot without touching it (failed read).
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % TEMPERATURE_SAMPLES;
    }

    pub fn average(&self) -> i32 {
        let sum: i64 = self.samples.iter().map(|&s| i64::from(s)).sum();
        (sum / TEMPERATURE_SAMPLES as i64) as i32
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_cold() {
        let ring = SampleRing::new();
        assert_eq!(ring.average(), 0);
        assert_eq!(ring.cursor(), 0);
    }

    #[test]
    fn unfilled_slots_pull_average_down() {
        let mut ring = SampleRing::new();
        ring.push(70);
        assert_eq!(ring.average(), 7);

        for _ in 1..TEMPERATURE_SAMPLES {
            ring.push(70);
        }
        assert_eq!(ring.average(), 70);
    }

    #[test]
    fn cursor_wraps_and_oldest_sample_is_replaced() {
        let mut ring = SampleRing::new();
        for _ in 0..TEMPERATURE_SAMPLES {
            ring.push(50);
        }
        assert_eq!(ring.cursor(), 0);

        ring.push(60);
        assert_eq!(ring.cursor(), 1);
        assert_eq!(ring.average(), 51);
    }

    #[test]
    fn advance_moves_by_one_and_keeps_slot() {
        let mut ring = SampleRing::new();
        for step in 0..3 * TEMPERATURE_SAMPLES {
            assert_eq!(ring.cursor(), step % TEMPERATURE_SAMPLES);
            ring.advance();
        }
        assert_eq!(ring.average(), 0);
    }

    #[test]
    fn integer_division_truncates() {
        let mut ring = SampleRing::new();
        ring.push(9);
        assert_eq!(ring.average(), 0);
        ring.push(45);
        assert_eq!(ring.average(), 5);
    }
}
