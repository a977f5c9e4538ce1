//! ==============================================================================
//! gateway.rs - receive / acknowledge / deduplicate / forward
//! ==============================================================================
//!
//! ```text
//! one `poll_once` call is one iteration of the gateway's control loop:
//!
//!     available? ──no──> Idle (caller does its housekeeping and polls again)
//!        │yes
//!     recv ──fail──> ReceiveFailed
//!        │
//!     len == 8? ──no──> LengthMismatch (no ACK)
//!        │yes
//!     ACK burst to payload.id            <- always, even for duplicates
//!        │
//!     tag seen recently? ──yes──> Duplicate
//!        │no
//!     MOISTURE / TEMPERATURE ──> forward (errors logged, never retried)
//!     anything else          ──> Ignored
//!
//! the ACK goes out before the duplicate check so the node can stop
//! retransmitting and go back to sleep as early as possible.
//!
//! the burst is a redundant broadcast, not a retry loop: the same ACK frame
//! is sent `ack_burst` times back to back with no feedback, so that at least
//! one copy survives a lossy half-duplex link while the node is listening.
//! ```
//!
//! ==============================================================================

use std::time::Duration;

use crate::dedup::DuplicateFilter;
use crate::domain::Reading;
use crate::forward::{check_uplink, Forwarder, UplinkError};
use crate::payload::{MeasurementType, NodeId, Payload, Tag, PAYLOAD_LEN};
use crate::radio::{transmit, Radio, RadioSettings, MAX_FRAME_LEN};

/// Pause between polls when nothing is pending.
const IDLE_POLL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Idle,
    ReceiveFailed,
    LengthMismatch { len: usize },
    Duplicate { node: NodeId, tag: Tag },
    Forwarded(Reading),
    ForwardFailed(Reading),
    Ignored { node: NodeId, kind: MeasurementType },
}

pub struct Gateway<R, F> {
    radio: R,
    forwarder: F,
    filter: DuplicateFilter,
    ack_burst: u16,
    show_sensor_data: bool,
}

impl<R: Radio, F: Forwarder> Gateway<R, F> {
    pub fn new(radio: R, forwarder: F, ack_burst: u16) -> Self {
        Self { radio, forwarder, filter: DuplicateFilter::new(), ack_burst, show_sensor_data: false }
    }

    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    /// Configure the radio. Failures are logged and the gateway keeps going.
    pub fn init_radio(&mut self, settings: &RadioSettings) {
        if let Err(e) = self.radio.init(settings) {
            tracing::error!("radio init failed: {}", e);
        }
    }

    pub async fn poll_once(&mut self) -> RelayOutcome {
        if !self.radio.available() {
            return RelayOutcome::Idle;
        }

        let mut buf = [0u8; MAX_FRAME_LEN];
        let Some(len) = self.radio.recv(&mut buf) else {
            tracing::warn!("recv failed");
            return RelayOutcome::ReceiveFailed;
        };
        tracing::debug!(frame = %hex::encode(&buf[..len]), "radio rx");

        let payload = match Payload::decode(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("{}", e);
                return RelayOutcome::LengthMismatch { len };
            }
        };

        self.send_ack_burst(payload.id);

        if self.filter.is_duplicate(payload.uuid_ish) {
            tracing::debug!(node_id = payload.id, tag = payload.uuid_ish, "duplicate, already forwarded");
            return RelayOutcome::Duplicate { node: payload.id, tag: payload.uuid_ish };
        }

        let Some(reading) = Reading::from_payload(&payload) else {
            tracing::debug!(node_id = payload.id, kind = ?payload.kind, "nothing to forward");
            return RelayOutcome::Ignored { node: payload.id, kind: payload.kind };
        };

        if self.show_sensor_data {
            tracing::info!(node_id = payload.id, tag = payload.uuid_ish, ?reading, "reading received");
        } else {
            tracing::debug!(node_id = payload.id, tag = payload.uuid_ish, ?reading, "reading received");
        }

        match self.forwarder.forward(&reading).await {
            Ok(()) => RelayOutcome::Forwarded(reading),
            Err(e) => {
                tracing::warn!(node_id = reading.node(), "forward failed, dropping reading: {}", e);
                RelayOutcome::ForwardFailed(reading)
            }
        }
    }

    fn send_ack_burst(&mut self, node: NodeId) {
        let frame = Payload::ack(node).encode();
        debug_assert_eq!(frame.len(), PAYLOAD_LEN);
        for sent in 0..self.ack_burst {
            if let Err(e) = transmit(&mut self.radio, &frame) {
                tracing::warn!(node_id = node, sent, "ACK burst cut short: {}", e);
                return;
            }
        }
    }

    /// The relay loop. Never returns.
    pub async fn run(mut self) {
        tracing::info!(ack_burst = self.ack_burst, filter = self.filter.capacity(), "gateway relay loop running");
        loop {
            match self.poll_once().await {
                RelayOutcome::Idle => tokio::time::sleep(IDLE_POLL).await,
                outcome => tracing::trace!(?outcome, "poll"),
            }
        }
    }
}

/// Boot-time uplink check. When the collector cannot be reached the gateway
/// waits out `reboot_delay` and gives up; the service manager restarts it.
pub async fn require_uplink(collector_url: &str, timeout: Duration, reboot_delay: Duration) -> Result<(), UplinkError> {
    match check_uplink(collector_url, timeout).await {
        Ok(()) => {
            tracing::info!("collector {} reachable", collector_url);
            Ok(())
        }
        Err(e) => {
            tracing::error!("{}, restarting in {:?}", e, reboot_delay);
            tokio::time::sleep(reboot_delay).await;
            Err(e)
        }
    }
}
