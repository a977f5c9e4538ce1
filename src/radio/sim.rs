//! In-process radio medium for development builds and the `simulate` role.
//!
//! Every attached `SimulatedRadio` hears every frame sent by the others,
//! each delivery independently dropped with probability `loss_rate`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Radio, RadioError, RadioSettings, MAX_FRAME_LEN};

/// Frames buffered per endpoint before the oldest is dropped, like a full RX FIFO.
const INBOX_DEPTH: usize = 3;

struct EtherState {
    inboxes: Vec<VecDeque<Vec<u8>>>,
    loss_rate: f64,
    rng: StdRng,
}

#[derive(Clone)]
pub struct SimulatedEther {
    state: Arc<Mutex<EtherState>>,
}

impl SimulatedEther {
    pub fn new(loss_rate: f64, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(EtherState {
                inboxes: Vec::new(),
                loss_rate: loss_rate.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EtherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a transceiver to the medium.
    pub fn attach(&self) -> SimulatedRadio {
        let mut state = self.lock();
        state.inboxes.push(VecDeque::new());
        SimulatedRadio { ether: self.clone(), slot: state.inboxes.len() - 1, configured: None }
    }

    fn broadcast(&self, from: usize, frame: &[u8]) {
        let mut state = self.lock();
        let EtherState { inboxes, loss_rate, rng } = &mut *state;
        for (slot, inbox) in inboxes.iter_mut().enumerate() {
            if slot == from || rng.gen_bool(*loss_rate) {
                continue;
            }
            if inbox.len() == INBOX_DEPTH {
                inbox.pop_front();
            }
            inbox.push_back(frame.to_vec());
        }
    }
}

pub struct SimulatedRadio {
    ether: SimulatedEther,
    slot: usize,
    configured: Option<RadioSettings>,
}

impl Radio for SimulatedRadio {
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        if settings.channel > 125 {
            return Err(RadioError::InvalidChannel(settings.channel));
        }
        tracing::info!(channel = settings.channel, "using simulated radio link");
        self.configured = Some(*settings);
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLong(frame.len()));
        }
        self.ether.broadcast(self.slot, frame);
        Ok(())
    }

    fn wait_packet_sent(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn available(&mut self) -> bool {
        !self.ether.lock().inboxes[self.slot].is_empty()
    }

    fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.ether.lock().inboxes[self.slot].pop_front()?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Some(len)
    }
}
