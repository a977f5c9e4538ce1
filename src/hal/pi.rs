// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
//
// - analog inputs go through an MCP3008 (10-bit, so full scale is 1024 like
//   the AVR ADC on the microcontroller nodes)
// - the DS18B20 is read through the kernel's w1-gpio/w1-therm drivers
// - sensor power and the pump relay are plain GPIO outputs

use super::{PumpDriver, SensorBoard, WaterSensor};

use anyhow::{anyhow, Context, Result};
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::path::PathBuf;
use std::time::Duration;

const W1_DEVICES: &str = "/sys/bus/w1/devices";
const DS18B20_FAMILY: &str = "28-";

pub struct Mcp3008 {
    spi: Spi,
}

impl Mcp3008 {
    pub fn open(slave: u8) -> Result<Self> {
        let ss = match slave {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            other => return Err(anyhow!("unsupported MCP3008 chip select {}", other)),
        };
        let spi = Spi::new(Bus::Spi0, ss, 1_000_000, Mode::Mode0)?;
        Ok(Self { spi })
    }

    /// Single-ended conversion on `channel` (0..=7).
    pub fn read(&self, channel: u8) -> Result<u16> {
        let write = [0x01, (0x08 | (channel & 0x07)) << 4, 0x00];
        let mut read = [0u8; 3];
        self.spi.transfer(&mut read, &write)?;
        Ok((u16::from(read[1] & 0x03) << 8) | u16::from(read[2]))
    }
}

fn output_pin(gpio: &Gpio, pin: u8) -> Result<OutputPin> {
    let mut p = gpio.get(pin).with_context(|| format!("GPIO {} unavailable", pin))?.into_output_low();
    // keep the level we set when the handle is dropped
    p.set_reset_on_drop(false);
    Ok(p)
}

pub struct PiBoard {
    adc: Mcp3008,
    moisture_power: OutputPin,
    moisture_channel: u8,
    probe_power: OutputPin,
    probe: Option<PathBuf>,
    entropy_channel: u8,
}

impl PiBoard {
    pub fn open(
        adc_slave: u8,
        moisture_power_pin: u8,
        moisture_channel: u8,
        probe_power_pin: u8,
        entropy_channel: u8,
    ) -> Result<Self> {
        tracing::info!("Using REAL HARDWARE sensor board (rppal)");
        let gpio = Gpio::new()?;
        Ok(Self {
            adc: Mcp3008::open(adc_slave)?,
            moisture_power: output_pin(&gpio, moisture_power_pin)?,
            moisture_channel,
            probe_power: output_pin(&gpio, probe_power_pin)?,
            probe: None,
            entropy_channel,
        })
    }

    fn find_probe() -> Option<PathBuf> {
        std::fs::read_dir(W1_DEVICES)
            .ok()?
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with(DS18B20_FAMILY))
            .map(|e| e.path().join("w1_slave"))
    }
}

/// Parse the kernel's two-line w1_slave dump ("... YES" / "... t=21375").
fn parse_w1_slave(text: &str) -> Result<f32> {
    let mut lines = text.lines();
    let crc_line = lines.next().ok_or_else(|| anyhow!("empty w1_slave"))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(anyhow!("DS18B20 CRC check failed"));
    }
    let milli = lines
        .next()
        .and_then(|l| l.split("t=").nth(1))
        .ok_or_else(|| anyhow!("missing t= field"))?
        .trim()
        .parse::<i32>()?;
    Ok(milli as f32 / 1000.0)
}

impl SensorBoard for PiBoard {
    fn set_moisture_power(&mut self, on: bool) -> Result<()> {
        if on { self.moisture_power.set_high() } else { self.moisture_power.set_low() }
        Ok(())
    }

    fn read_moisture_raw(&mut self) -> Result<u16> {
        self.adc.read(self.moisture_channel)
    }

    fn detect_temperature_probe(&mut self) -> bool {
        self.probe_power.set_high();
        std::thread::sleep(Duration::from_millis(50));
        self.probe = Self::find_probe();
        self.probe_power.set_low();
        self.probe.is_some()
    }

    fn request_temperature(&mut self) -> Result<()> {
        // w1-therm converts on read; powering up early still buys the settle time
        self.probe_power.set_high();
        Ok(())
    }

    fn read_temperature(&mut self) -> Result<f32> {
        let path = self.probe.as_ref().ok_or_else(|| anyhow!("no DS18B20 found"))?;
        let text = std::fs::read_to_string(path);
        self.probe_power.set_low();
        parse_w1_slave(&text?)
    }

    fn entropy(&mut self) -> u16 {
        self.adc.read(self.entropy_channel).unwrap_or(0)
    }

    fn power_down(&mut self, quantum: Duration) {
        // no deep sleep on Linux; just stay off the CPU
        std::thread::sleep(quantum);
    }
}

/// Pump behind a relay board. Most relay boards are active-low.
pub struct RelayPump {
    pin: OutputPin,
    active_low: bool,
}

impl RelayPump {
    pub fn open(pin: u8, active_low: bool) -> Result<Self> {
        tracing::info!("Using REAL HARDWARE pump relay on GPIO {} (rppal)", pin);
        let gpio = Gpio::new()?;
        let mut pump = Self { pin: output_pin(&gpio, pin)?, active_low };
        pump.set_enabled(false)?;
        Ok(pump)
    }
}

impl PumpDriver for RelayPump {
    fn set_enabled(&mut self, on: bool) -> Result<()> {
        if on != self.active_low { self.pin.set_high() } else { self.pin.set_low() }
        Ok(())
    }
}

pub struct PiWaterSensor {
    adc: Mcp3008,
    power: OutputPin,
    channel: u8,
}

impl PiWaterSensor {
    pub fn open(adc_slave: u8, power_pin: u8, channel: u8) -> Result<Self> {
        let gpio = Gpio::new()?;
        Ok(Self { adc: Mcp3008::open(adc_slave)?, power: output_pin(&gpio, power_pin)?, channel })
    }
}

impl WaterSensor for PiWaterSensor {
    fn set_power(&mut self, on: bool) -> Result<()> {
        if on { self.power.set_high() } else { self.power.set_low() }
        Ok(())
    }

    fn read_raw(&mut self) -> Result<u16> {
        self.adc.read(self.channel)
    }
}
