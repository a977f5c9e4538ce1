//! ==============================================================================
//! nrf24.rs - nRF24L01+ transceiver over rppal
//! ==============================================================================
//!
//! ```text
//! wiring (BCM numbering, defaults from host.toml):
//!     SPI0 / CE0  -> CSN
//!     GPIO 25     -> CE
//!
//! link setup:
//!     - dynamic payload length on pipe 0, 2-byte CRC
//!     - hardware auto-ack OFF; the protocol acks in software
//!     - one shared 5-byte address (E7E7E7E7E7) for tx and pipe 0
//!     - each frame carries a 4-byte broadcast header (to, from, id, flags)
//!       so the air format matches the RadioHead-based firmware nodes
//! ```
//!
//! ==============================================================================

use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode as SpiMode, SlaveSelect, Spi};

use super::{DataRate, Radio, RadioError, RadioSettings, TxPower, MAX_FRAME_LEN};

// commands
const R_REGISTER: u8 = 0x00;
const W_REGISTER: u8 = 0x20;
const R_RX_PL_WID: u8 = 0x60;
const R_RX_PAYLOAD: u8 = 0x61;
const W_TX_PAYLOAD_NOACK: u8 = 0xB0;
const FLUSH_TX: u8 = 0xE1;
const FLUSH_RX: u8 = 0xE2;
const NOP: u8 = 0xFF;

// registers
const REG_CONFIG: u8 = 0x00;
const REG_EN_AA: u8 = 0x01;
const REG_EN_RXADDR: u8 = 0x02;
const REG_SETUP_AW: u8 = 0x03;
const REG_SETUP_RETR: u8 = 0x04;
const REG_RF_CH: u8 = 0x05;
const REG_RF_SETUP: u8 = 0x06;
const REG_STATUS: u8 = 0x07;
const REG_RX_ADDR_P0: u8 = 0x0A;
const REG_TX_ADDR: u8 = 0x10;
const REG_FIFO_STATUS: u8 = 0x17;
const REG_DYNPD: u8 = 0x1C;
const REG_FEATURE: u8 = 0x1D;

// CONFIG bits
const PRIM_RX: u8 = 0x01;
const PWR_UP: u8 = 0x02;
const CRCO: u8 = 0x04;
const EN_CRC: u8 = 0x08;

// STATUS bits
const RX_DR: u8 = 0x40;
const TX_DS: u8 = 0x20;
const MAX_RT: u8 = 0x10;

const FIFO_RX_EMPTY: u8 = 0x01;

// RF_SETUP bits
const RF_DR_LOW: u8 = 0x20;
const RF_DR_HIGH: u8 = 0x08;

// FEATURE bits
const EN_DPL: u8 = 0x04;
const EN_DYN_ACK: u8 = 0x01;

const ADDRESS: [u8; 5] = [0xE7; 5];
const HEADER_LEN: usize = 4;
const BROADCAST: u8 = 0xFF;
const HW_PAYLOAD_MAX: usize = 32;

const TX_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChipMode {
    Idle,
    Rx,
    Tx,
}

pub struct Nrf24 {
    spi: Spi,
    ce: OutputPin,
    mode: ChipMode,
}

impl Nrf24 {
    pub fn open(bus: u8, slave: u8, ce_pin: u8) -> Result<Self, RadioError> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            other => return Err(RadioError::Init(format!("unsupported SPI bus {other}"))),
        };
        let slave = match slave {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            other => return Err(RadioError::Init(format!("unsupported SPI slave {other}"))),
        };
        let spi = Spi::new(bus, slave, 8_000_000, SpiMode::Mode0)?;
        let ce = Gpio::new()?.get(ce_pin)?.into_output_low();
        Ok(Self { spi, ce, mode: ChipMode::Idle })
    }

    fn command(&mut self, write: &[u8], read: &mut [u8]) -> Result<(), RadioError> {
        self.spi.transfer(read, write)?;
        Ok(())
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), RadioError> {
        let mut read = [0u8; 2];
        self.command(&[W_REGISTER | reg, value], &mut read)
    }

    fn write_register_bytes(&mut self, reg: u8, bytes: &[u8]) -> Result<(), RadioError> {
        let mut write = Vec::with_capacity(bytes.len() + 1);
        write.push(W_REGISTER | reg);
        write.extend_from_slice(bytes);
        let mut read = vec![0u8; write.len()];
        self.command(&write, &mut read)
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, RadioError> {
        let mut read = [0u8; 2];
        self.command(&[R_REGISTER | reg, NOP], &mut read)?;
        Ok(read[1])
    }

    fn strobe(&mut self, cmd: u8) -> Result<u8, RadioError> {
        let mut read = [0u8; 1];
        self.command(&[cmd], &mut read)?;
        Ok(read[0])
    }

    fn status(&mut self) -> Result<u8, RadioError> {
        self.strobe(NOP)
    }

    fn set_mode(&mut self, mode: ChipMode) -> Result<(), RadioError> {
        if self.mode == mode {
            return Ok(());
        }
        self.ce.set_low();
        let config = match mode {
            ChipMode::Idle => EN_CRC | CRCO,
            ChipMode::Rx => EN_CRC | CRCO | PWR_UP | PRIM_RX,
            ChipMode::Tx => EN_CRC | CRCO | PWR_UP,
        };
        self.write_register(REG_CONFIG, config)?;
        if mode == ChipMode::Rx {
            self.ce.set_high();
        }
        // power-up settle
        thread::sleep(Duration::from_micros(1500));
        self.mode = mode;
        Ok(())
    }

    fn rf_setup(settings: &RadioSettings) -> u8 {
        let rate = match settings.data_rate {
            DataRate::Kbps250 => RF_DR_LOW,
            DataRate::Mbps1 => 0,
            DataRate::Mbps2 => RF_DR_HIGH,
        };
        let power = match settings.power {
            TxPower::Minus18Dbm => 0x00,
            TxPower::Minus12Dbm => 0x02,
            TxPower::Minus6Dbm => 0x04,
            TxPower::Dbm0 => 0x06,
        };
        rate | power
    }

    fn rx_fifo_empty(&mut self) -> Result<bool, RadioError> {
        Ok(self.read_register(REG_FIFO_STATUS)? & FIFO_RX_EMPTY != 0)
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, RadioError> {
        let mut width = [0u8; 2];
        self.command(&[R_RX_PL_WID, NOP], &mut width)?;
        let width = width[1] as usize;
        if width > HW_PAYLOAD_MAX {
            // corrupt width, datasheet says flush
            self.strobe(FLUSH_RX)?;
            return Ok(None);
        }

        let mut write = vec![NOP; width + 1];
        write[0] = R_RX_PAYLOAD;
        let mut read = vec![0u8; width + 1];
        self.command(&write, &mut read)?;
        self.write_register(REG_STATUS, RX_DR)?;

        if width < HEADER_LEN {
            return Ok(None);
        }
        let body = &read[1 + HEADER_LEN..];
        let len = body.len().min(buf.len());
        buf[..len].copy_from_slice(&body[..len]);
        Ok(Some(len))
    }
}

impl Radio for Nrf24 {
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        if settings.channel > 125 {
            return Err(RadioError::InvalidChannel(settings.channel));
        }
        self.ce.set_low();
        self.write_register(REG_CONFIG, EN_CRC | CRCO)?;
        // a missing or unpowered chip reads back all zeros or all ones
        let readback = self.read_register(REG_CONFIG)?;
        if readback != EN_CRC | CRCO {
            return Err(RadioError::Init(format!("CONFIG read back 0x{readback:02X}, is the module connected?")));
        }
        self.mode = ChipMode::Idle;

        self.write_register(REG_EN_AA, 0x00)?;
        self.write_register(REG_EN_RXADDR, 0x01)?;
        self.write_register(REG_SETUP_AW, 0x03)?;
        self.write_register(REG_SETUP_RETR, 0x00)?;
        self.write_register(REG_RF_CH, settings.channel)?;
        self.write_register(REG_RF_SETUP, Self::rf_setup(settings))?;
        self.write_register_bytes(REG_RX_ADDR_P0, &ADDRESS)?;
        self.write_register_bytes(REG_TX_ADDR, &ADDRESS)?;
        self.write_register(REG_FEATURE, EN_DPL | EN_DYN_ACK)?;
        self.write_register(REG_DYNPD, 0x3F)?;
        self.write_register(REG_STATUS, RX_DR | TX_DS | MAX_RT)?;
        self.strobe(FLUSH_TX)?;
        self.strobe(FLUSH_RX)?;

        tracing::info!(channel = settings.channel, rate = ?settings.data_rate, power = ?settings.power, "nRF24L01+ ready");
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLong(frame.len()));
        }
        self.set_mode(ChipMode::Tx)?;
        self.strobe(FLUSH_TX)?;

        let mut write = Vec::with_capacity(1 + HEADER_LEN + frame.len());
        write.extend_from_slice(&[W_TX_PAYLOAD_NOACK, BROADCAST, BROADCAST, 0, 0]);
        write.extend_from_slice(frame);
        let mut read = vec![0u8; write.len()];
        self.command(&write, &mut read)?;

        // >10us CE pulse starts the transmission
        self.ce.set_high();
        thread::sleep(Duration::from_micros(15));
        self.ce.set_low();
        Ok(())
    }

    fn wait_packet_sent(&mut self) -> Result<(), RadioError> {
        if self.mode != ChipMode::Tx {
            return Ok(());
        }
        let started = Instant::now();
        loop {
            let status = self.status()?;
            if status & (TX_DS | MAX_RT) != 0 {
                self.write_register(REG_STATUS, TX_DS | MAX_RT)?;
                self.set_mode(ChipMode::Idle)?;
                return Ok(());
            }
            if started.elapsed() > TX_TIMEOUT {
                self.strobe(FLUSH_TX)?;
                self.set_mode(ChipMode::Idle)?;
                return Err(RadioError::TxTimeout);
            }
            thread::yield_now();
        }
    }

    fn available(&mut self) -> bool {
        if self.mode == ChipMode::Tx {
            return false;
        }
        let checked = self.set_mode(ChipMode::Rx).and_then(|_| self.rx_fifo_empty());
        match checked {
            Ok(empty) => !empty,
            Err(e) => {
                tracing::warn!("radio poll failed: {}", e);
                false
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.available() {
            return None;
        }
        match self.read_frame(buf) {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!("radio read failed: {}", e);
                None
            }
        }
    }

    fn sleep(&mut self) {
        if let Err(e) = self.set_mode(ChipMode::Idle) {
            tracing::warn!("radio power-down failed: {}", e);
        }
    }
}
