//! ==============================================================================
//! radio - the half-duplex packet radio boundary
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     node.rs and gateway.rs talk to the transceiver only through the
//!     `Radio` trait. the trait is synchronous on purpose: both loops poll it
//!     from a single call stack, and only one of send/receive is ever in
//!     flight.
//!
//! implementations:
//!     - nrf24.rs: nRF24L01+ over rppal SPI (feature = "hardware")
//!     - sim.rs:   in-process lossy broadcast medium (always available)
//! ```
//!
//! ==============================================================================

#[cfg(feature = "hardware")]
pub mod nrf24;
pub mod sim;

use serde::Deserialize;
use thiserror::Error;

/// Largest frame the link carries: a 32-byte FIFO minus the 4-byte link header.
pub const MAX_FRAME_LEN: usize = 28;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("radio init failed: {0}")]
    Init(String),
    #[error("channel {0} out of range (0..=125)")]
    InvalidChannel(u8),
    #[error("frame of {0} bytes exceeds the 28-byte link limit")]
    FrameTooLong(usize),
    #[error("timed out waiting for transmission to complete")]
    TxTimeout,
    #[cfg(feature = "hardware")]
    #[error(transparent)]
    Spi(#[from] rppal::spi::Error),
    #[cfg(feature = "hardware")]
    #[error(transparent)]
    Gpio(#[from] rppal::gpio::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DataRate {
    #[serde(rename = "250kbps")]
    Kbps250,
    #[serde(rename = "1mbps")]
    Mbps1,
    #[serde(rename = "2mbps")]
    Mbps2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TxPower {
    #[serde(rename = "-18dbm")]
    Minus18Dbm,
    #[serde(rename = "-12dbm")]
    Minus12Dbm,
    #[serde(rename = "-6dbm")]
    Minus6Dbm,
    #[serde(rename = "0dbm")]
    Dbm0,
}

/// Fixed link parameters, identical on every node and the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    pub channel: u8,
    pub data_rate: DataRate,
    pub power: TxPower,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self { channel: 1, data_rate: DataRate::Kbps250, power: TxPower::Dbm0 }
    }
}

pub trait Radio {
    /// Configure channel, data rate and power. Leaves the radio idle.
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError>;

    /// Queue one frame for transmission.
    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Block until the queued frame has physically left the antenna.
    fn wait_packet_sent(&mut self) -> Result<(), RadioError>;

    /// Non-blocking: is a received frame waiting?
    fn available(&mut self) -> bool;

    /// Copy the next frame into `buf`, returning its length, or `None` if
    /// nothing could be read. Frames longer than `buf` are truncated.
    fn recv(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Lowest-power state until the next send/available call.
    fn sleep(&mut self) {}
}

impl<R: Radio + ?Sized> Radio for Box<R> {
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        (**self).init(settings)
    }
    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        (**self).send(frame)
    }
    fn wait_packet_sent(&mut self) -> Result<(), RadioError> {
        (**self).wait_packet_sent()
    }
    fn available(&mut self) -> bool {
        (**self).available()
    }
    fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        (**self).recv(buf)
    }
    fn sleep(&mut self) {
        (**self).sleep()
    }
}

/// Send `frame` and wait for it to go out.
pub fn transmit<R: Radio + ?Sized>(radio: &mut R, frame: &[u8]) -> Result<(), RadioError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(RadioError::FrameTooLong(frame.len()));
    }
    tracing::debug!(frame = %hex::encode(frame), "radio tx");
    radio.send(frame)?;
    radio.wait_packet_sent()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_deserialize_from_config_strings() {
        let s: RadioSettings = toml::from_str(
            r#"
            channel = 76
            data_rate = "2mbps"
            power = "-6dbm"
            "#,
        )
        .unwrap();
        assert_eq!(s, RadioSettings { channel: 76, data_rate: DataRate::Mbps2, power: TxPower::Minus6Dbm });
    }

    #[test]
    fn transmit_refuses_oversized_frames() {
        let ether = sim::SimulatedEther::new(0.0, 1);
        let mut radio = ether.attach();
        assert!(matches!(transmit(&mut radio, &[0u8; 29]), Err(RadioError::FrameTooLong(29))));
        assert!(transmit(&mut radio, &[0u8; 28]).is_ok());
    }
}
