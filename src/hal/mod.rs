//! ==============================================================================
//! hal - Hardware Abstraction Layer
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     everything the node, gateway and irrigation controller touch besides
//!     the radio: clocks, the soil/temperature probes, the pump relay and the
//!     tank's water sensor.
//!
//! design philosophy:
//!     - "Compile Anywhere": sim.rs backs every trait with an in-memory device
//!       so the crate builds and runs on a laptop.
//!     - "Real on the Pi": pi.rs (feature = "hardware") drives the actual
//!       pins through `rppal`.
//!     - "Injectable time": node timing goes through `Clock`, so tests can
//!       run a 100 ms busy-wait without sleeping.
//!
//! relationships:
//!     - used by: node.rs (Clock, SensorBoard)
//!     - used by: irrigation (PumpDriver, WaterSensor)
//!     - uses: rppal (on feature="hardware")
//! ```
//!
//! ==============================================================================

#[cfg(feature = "hardware")]
pub mod pi;
pub mod sim;

use anyhow::Result;
use std::time::{Duration, Instant};

/// Monotonic millisecond counter. Wraps at `u32::MAX`; callers compare with
/// `wrapping_sub`.
pub trait Clock {
    fn millis(&self) -> u32;
    fn delay_ms(&self, ms: u32);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> u32 {
        // truncation is the wraparound
        self.origin.elapsed().as_millis() as u32
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Probes and power control on a sensor node.
pub trait SensorBoard {
    fn set_moisture_power(&mut self, on: bool) -> Result<()>;
    /// Raw analog reading, 0..full scale, lower means wetter.
    fn read_moisture_raw(&mut self) -> Result<u16>;

    /// Look for a temperature probe. Called once at boot.
    fn detect_temperature_probe(&mut self) -> bool;
    /// Power the probe and start a conversion without waiting for it.
    fn request_temperature(&mut self) -> Result<()>;
    /// Read the finished conversion (degrees C) and power the probe down.
    fn read_temperature(&mut self) -> Result<f32>;

    /// Noise for seeding the tag generator.
    fn entropy(&mut self) -> u16;

    /// Lowest-power state for one hardware sleep quantum.
    fn power_down(&mut self, quantum: Duration);
}

pub trait PumpDriver: Send {
    fn set_enabled(&mut self, on: bool) -> Result<()>;
}

pub trait WaterSensor: Send {
    fn set_power(&mut self, on: bool) -> Result<()>;
    fn read_raw(&mut self) -> Result<u16>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock::new();
        let start = clock.millis();
        clock.delay_ms(5);
        assert!(clock.millis().wrapping_sub(start) >= 5);
    }
}
