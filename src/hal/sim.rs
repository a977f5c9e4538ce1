// ==============================================================================================
// SIMULATED DEVICES (default build, the simulate role, and tests)
// ==============================================================================================

use super::{PumpDriver, SensorBoard, WaterSensor};

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A node's probes: soil that slowly dries out, a room-temperature probe.
pub struct SimulatedBoard {
    rng: StdRng,
    moisture_raw: u16,
    moisture_powered: bool,
    has_probe: bool,
    probe_requested: bool,
}

impl SimulatedBoard {
    pub fn new(seed: u64, has_probe: bool) -> Self {
        tracing::info!("Using SIMULATED sensor board (No hardware access)");
        Self { rng: StdRng::seed_from_u64(seed), moisture_raw: 300, moisture_powered: false, has_probe, probe_requested: false }
    }
}

impl SensorBoard for SimulatedBoard {
    fn set_moisture_power(&mut self, on: bool) -> Result<()> {
        tracing::debug!("[SIM BOARD] moisture power {}", if on { "ON" } else { "OFF" });
        self.moisture_powered = on;
        Ok(())
    }

    fn read_moisture_raw(&mut self) -> Result<u16> {
        if !self.moisture_powered {
            bail!("moisture probe read while unpowered");
        }
        // drifts drier, occasionally "watered"
        self.moisture_raw = if self.rng.gen_bool(0.05) { 250 } else { (self.moisture_raw + self.rng.gen_range(0..8)).min(1023) };
        Ok(self.moisture_raw)
    }

    fn detect_temperature_probe(&mut self) -> bool {
        self.has_probe
    }

    fn request_temperature(&mut self) -> Result<()> {
        if !self.has_probe {
            bail!("no temperature probe");
        }
        self.probe_requested = true;
        Ok(())
    }

    fn read_temperature(&mut self) -> Result<f32> {
        if !std::mem::take(&mut self.probe_requested) {
            bail!("temperature read without a pending conversion");
        }
        Ok(self.rng.gen_range(15.0..25.0))
    }

    fn entropy(&mut self) -> u16 {
        self.rng.gen()
    }

    fn power_down(&mut self, quantum: Duration) {
        std::thread::sleep(quantum);
    }
}

/// Pump relay whose state can be observed from outside.
pub struct SimulatedPump {
    on: Arc<AtomicBool>,
}

impl SimulatedPump {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        tracing::info!("Using SIMULATED pump relay");
        let on = Arc::new(AtomicBool::new(false));
        (Self { on: on.clone() }, on)
    }
}

impl PumpDriver for SimulatedPump {
    fn set_enabled(&mut self, on: bool) -> Result<()> {
        tracing::debug!("[SIM PUMP] {}", if on { "ON" } else { "OFF" });
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }
}

/// Tank sensor whose level can be changed from outside. Reads 0 when unpowered.
pub struct SimulatedWaterSensor {
    level: Arc<AtomicU16>,
    powered: bool,
}

impl SimulatedWaterSensor {
    pub fn new(initial: u16) -> (Self, Arc<AtomicU16>) {
        tracing::info!("Using SIMULATED water sensor");
        let level = Arc::new(AtomicU16::new(initial));
        (Self { level: level.clone(), powered: false }, level)
    }
}

impl WaterSensor for SimulatedWaterSensor {
    fn set_power(&mut self, on: bool) -> Result<()> {
        self.powered = on;
        Ok(())
    }

    fn read_raw(&mut self) -> Result<u16> {
        Ok(if self.powered { self.level.load(Ordering::SeqCst) } else { 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moisture_needs_power() {
        let mut board = SimulatedBoard::new(1, true);
        assert!(board.read_moisture_raw().is_err());
        board.set_moisture_power(true).unwrap();
        let raw = board.read_moisture_raw().unwrap();
        assert!(raw < 1024);
    }

    #[test]
    fn temperature_needs_a_request() {
        let mut board = SimulatedBoard::new(1, true);
        assert!(board.read_temperature().is_err());
        board.request_temperature().unwrap();
        let t = board.read_temperature().unwrap();
        assert!((15.0..25.0).contains(&t));
    }

    #[test]
    fn water_sensor_reads_zero_unpowered() {
        let (mut sensor, level) = SimulatedWaterSensor::new(900);
        assert_eq!(sensor.read_raw().unwrap(), 0);
        sensor.set_power(true).unwrap();
        assert_eq!(sensor.read_raw().unwrap(), 900);
        level.store(10, Ordering::SeqCst);
        assert_eq!(sensor.read_raw().unwrap(), 10);
    }
}
