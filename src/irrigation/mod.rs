//! ==============================================================================
//! irrigation - timed pump control behind a water-presence interlock
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     the pump may only run while the tank has water. a background task
//!     re-samples the water sensor every `water_check_interval`; if water
//!     disappears while the pump runs, watering is aborted immediately and the
//!     pending auto-off is cancelled, whatever duration was requested.
//!
//! shared state:
//!     `Irrigation` is a cheap Clone handle (like the web server's state in
//!     most axum apps). the pump and its flags sit behind one tokio Mutex so
//!     the HTTP handlers, the auto-off timer and the water watch never
//!     interleave a half-finished pump change.
//!
//! relationships:
//!     - used by: web.rs (HTTP commands), main.rs (startup, shutdown)
//!     - uses: hal (PumpDriver, WaterSensor)
//! ```
//!
//! ==============================================================================

pub mod web;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::IrrigationConfig;
use crate::hal::{PumpDriver, WaterSensor};

#[derive(Debug, Clone)]
pub struct IrrigationSettings {
    pub max_pump_seconds: u32,
    pub water_threshold: u16,
    pub water_settle: Duration,
    pub water_check_interval: Duration,
}

impl IrrigationSettings {
    pub fn from_config(cfg: &IrrigationConfig) -> Self {
        Self {
            max_pump_seconds: cfg.max_pump_seconds,
            water_threshold: cfg.water_threshold,
            water_settle: Duration::from_millis(cfg.water_settle_ms),
            water_check_interval: Duration::from_millis(cfg.water_check_interval_ms),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PumpOnError {
    #[error("Invalid params")]
    InvalidParams,
    #[error("No water detected, fill before using")]
    NoWater,
    #[error("Pump is already running")]
    AlreadyRunning,
    #[error("pump relay failed: {0}")]
    Hardware(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStatus {
    pub running: bool,
    pub water_present: bool,
}

struct PumpState {
    pump: Box<dyn PumpDriver>,
    running: bool,
    water_present: bool,
    auto_off: Option<JoinHandle<()>>,
    /// bumped on every pump-on so a stale auto-off can tell it lost the race
    run_id: u64,
}

impl PumpState {
    fn set_pump(&mut self, on: bool) -> anyhow::Result<()> {
        tracing::info!("Setting pump enabled to {}", on);
        self.pump.set_enabled(on)?;
        self.running = on;
        Ok(())
    }

    /// Cancel any scheduled auto-off and force the pump off.
    fn abort(&mut self) {
        if let Some(timer) = self.auto_off.take() {
            timer.abort();
        }
        if let Err(e) = self.set_pump(false) {
            // assume it is still running so the next abort tries again
            tracing::error!("failed to switch pump off: {:#}", e);
        }
    }
}

#[derive(Clone)]
pub struct Irrigation {
    state: Arc<Mutex<PumpState>>,
    water: Arc<Mutex<Box<dyn WaterSensor>>>,
    settings: Arc<IrrigationSettings>,
}

impl Irrigation {
    pub fn new(pump: Box<dyn PumpDriver>, water: Box<dyn WaterSensor>, settings: IrrigationSettings) -> Self {
        let state = PumpState { pump, running: false, water_present: false, auto_off: None, run_id: 0 };
        Self { state: Arc::new(Mutex::new(state)), water: Arc::new(Mutex::new(water)), settings: Arc::new(settings) }
    }

    /// Pump off, first water sample. Call before serving requests.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.state.lock().await.set_pump(false)?;
        let present = self.check_water().await;
        tracing::info!(water_present = present, "irrigation controller ready");
        Ok(())
    }

    pub async fn status(&self) -> PumpStatus {
        let st = self.state.lock().await;
        PumpStatus { running: st.running, water_present: st.water_present }
    }

    /// Run the pump for `seconds`, then switch it off automatically.
    pub async fn pump_on(&self, seconds: i64) -> Result<(), PumpOnError> {
        if seconds <= 0 || seconds > i64::from(self.settings.max_pump_seconds) {
            return Err(PumpOnError::InvalidParams);
        }

        let mut st = self.state.lock().await;
        if !st.water_present {
            return Err(PumpOnError::NoWater);
        }
        if st.running {
            return Err(PumpOnError::AlreadyRunning);
        }

        st.set_pump(true).map_err(|e| PumpOnError::Hardware(format!("{:#}", e)))?;
        st.run_id += 1;
        let run_id = st.run_id;

        let state = self.state.clone();
        let duration = Duration::from_secs(seconds.unsigned_abs());
        st.auto_off = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut st = state.lock().await;
            if st.run_id == run_id && st.running {
                tracing::info!(seconds = duration.as_secs(), "watering done");
                st.auto_off = None;
                st.abort();
            }
        }));
        Ok(())
    }

    /// Idempotent stop.
    pub async fn pump_off(&self) {
        self.state.lock().await.abort();
    }

    /// Sample the tank and apply the interlock. Returns whether water is present.
    pub async fn check_water(&self) -> bool {
        let present = match self.sample_water().await {
            Ok(raw) => {
                tracing::debug!("Water analog reading: {}", raw);
                raw >= self.settings.water_threshold
            }
            Err(e) => {
                tracing::warn!("water sensor read failed, treating tank as empty: {:#}", e);
                false
            }
        };

        let mut st = self.state.lock().await;
        st.water_present = present;
        if !present && st.running {
            tracing::warn!("water gone while pumping, aborting");
            st.abort();
        }
        present
    }

    async fn sample_water(&self) -> anyhow::Result<u16> {
        let mut sensor = self.water.lock().await;
        sensor.set_power(true)?;
        tokio::time::sleep(self.settings.water_settle).await;
        let raw = sensor.read_raw();
        sensor.set_power(false)?;
        raw
    }

    /// Periodic water check for the life of the process.
    pub fn spawn_water_watch(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.water_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick is immediate and start() has just sampled
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.check_water().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimulatedPump, SimulatedWaterSensor};
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

    pub(crate) fn controller(water: u16) -> (Irrigation, Arc<AtomicBool>, Arc<AtomicU16>) {
        let (pump, pump_on) = SimulatedPump::new();
        let (sensor, level) = SimulatedWaterSensor::new(water);
        let settings = IrrigationSettings::from_config(&IrrigationConfig::default());
        (Irrigation::new(Box::new(pump), Box::new(sensor), settings), pump_on, level)
    }

    #[tokio::test(start_paused = true)]
    async fn start_samples_water_and_forces_pump_off() {
        let (irr, pump, _) = controller(900);
        pump.store(true, Ordering::SeqCst);
        irr.start().await.unwrap();
        assert!(!pump.load(Ordering::SeqCst));
        assert_eq!(irr.status().await, PumpStatus { running: false, water_present: true });
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_is_inclusive() {
        let (irr, _, level) = controller(512);
        assert!(irr.check_water().await);
        level.store(511, Ordering::SeqCst);
        assert!(!irr.check_water().await);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_durations_are_invalid() {
        let (irr, pump, _) = controller(900);
        irr.start().await.unwrap();
        for secs in [0, -1, 21, 25] {
            assert_eq!(irr.pump_on(secs).await, Err(PumpOnError::InvalidParams));
        }
        assert!(!pump.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_params_wins_over_no_water() {
        let (irr, _, _) = controller(0);
        irr.start().await.unwrap();
        assert_eq!(irr.pump_on(25).await, Err(PumpOnError::InvalidParams));
        assert_eq!(irr.pump_on(10).await, Err(PumpOnError::NoWater));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_off_fires_after_requested_duration() {
        let (irr, pump, _) = controller(900);
        irr.start().await.unwrap();

        irr.pump_on(10).await.unwrap();
        assert!(pump.load(Ordering::SeqCst));
        assert_eq!(irr.pump_on(5).await, Err(PumpOnError::AlreadyRunning));

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(irr.status().await.running);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!pump.load(Ordering::SeqCst));
        assert!(!irr.status().await.running);
    }

    #[tokio::test(start_paused = true)]
    async fn water_loss_aborts_and_cancels_auto_off() {
        let (irr, pump, level) = controller(900);
        irr.start().await.unwrap();
        let watch = irr.spawn_water_watch();

        irr.pump_on(20).await.unwrap();
        level.store(100, Ordering::SeqCst);

        // next check runs 5 s after start, well before the 20 s are up
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!pump.load(Ordering::SeqCst));
        assert!(irr.state.lock().await.auto_off.is_none());

        // refill and start a new run; the cancelled timer must not cut it short
        level.store(900, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        irr.pump_on(20).await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(pump.load(Ordering::SeqCst));
        watch.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn pump_off_is_idempotent_and_stale_timer_is_ignored() {
        let (irr, pump, _) = controller(900);
        irr.start().await.unwrap();
        irr.pump_off().await;

        irr.pump_on(3).await.unwrap();
        irr.pump_off().await;
        irr.pump_off().await;
        assert!(!pump.load(Ordering::SeqCst));

        irr.pump_on(10).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(pump.load(Ordering::SeqCst));
    }
}
