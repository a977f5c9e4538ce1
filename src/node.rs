//! ==============================================================================
//! node.rs - the battery sensor node's wake cycle
//! ==============================================================================
//!
//! ```text
//! one wake period:
//!
//!     1. probe present? start a temperature conversion, note the time
//!     2. moisture: power, settle, read, power off, invert -> send-with-retry
//!     3. temperature: wait out the conversion, read, round -> send-with-retry
//!     4. radio to sleep, `sleep_quanta` hardware power-downs, wake_count += 1
//!
//! send-with-retry sends the *identical* frame (same correlation tag) up to
//! `retry_count` times and busy-waits `ack_timeout_ms` after each send for an
//! ACK addressed to this node. the gateway's duplicate filter absorbs the
//! copies. running out of attempts is logged and the cycle carries on: a lost
//! reading costs less than a flat battery.
//!
//! all timing goes through `Clock`, which wraps at u32::MAX; every elapsed
//! time is computed with `wrapping_sub`.
//! ```
//!
//! ==============================================================================

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::NodeConfig;
use crate::hal::{Clock, SensorBoard};
use crate::payload::{MeasurementType, NodeId, Payload, Tag};
use crate::radio::{transmit, Radio, RadioSettings, MAX_FRAME_LEN};

/// Upper bound (exclusive) of the random part of a correlation tag.
const TAG_SPREAD: u16 = 40_000;

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub node_id: NodeId,
    pub retry_count: u8,
    pub ack_timeout_ms: u32,
    pub moisture_enabled: bool,
    pub moisture_settle_ms: u32,
    pub moisture_full_scale: u16,
    pub temperature_settle_ms: u32,
    pub sleep_quantum: Duration,
    pub sleep_quanta: u32,
}

impl NodeSettings {
    pub fn from_config(node_id: NodeId, cfg: &NodeConfig) -> Self {
        Self {
            node_id,
            retry_count: cfg.retry_count,
            ack_timeout_ms: cfg.ack_timeout_ms,
            moisture_enabled: cfg.moisture_enabled,
            moisture_settle_ms: cfg.moisture_settle_ms,
            moisture_full_scale: cfg.moisture_full_scale,
            temperature_settle_ms: cfg.temperature_settle_ms,
            sleep_quantum: Duration::from_millis(cfg.sleep_quantum_ms),
            sleep_quanta: cfg.sleep_quanta,
        }
    }
}

/// What happened to one reading during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub value: u16,
    pub tag: Tag,
    pub attempts: u8,
    pub acked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub wake_count: u16,
    pub moisture: Option<Delivery>,
    pub temperature: Option<Delivery>,
}

pub struct SensorNode<R, C, B> {
    radio: R,
    clock: C,
    board: B,
    settings: NodeSettings,
    rng: StdRng,
    wake_count: u16,
    has_probe: bool,
}

impl<R: Radio, C: Clock, B: SensorBoard> SensorNode<R, C, B> {
    /// Bring the node up: radio init (failure logged, not fatal), probe
    /// detection, tag generator seeded from board noise.
    pub fn boot(mut radio: R, clock: C, mut board: B, settings: NodeSettings, radio_settings: &RadioSettings) -> Self {
        if let Err(e) = radio.init(radio_settings) {
            tracing::error!(node_id = settings.node_id, "radio init failed, continuing anyway: {}", e);
        }
        let has_probe = board.detect_temperature_probe();
        let seed = board.entropy();
        tracing::info!(node_id = settings.node_id, has_probe, "node booted");

        Self { radio, clock, board, settings, rng: StdRng::seed_from_u64(u64::from(seed)), wake_count: 0, has_probe }
    }

    pub fn wake_count(&self) -> u16 {
        self.wake_count
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport { wake_count: self.wake_count, ..Default::default() };

        let conversion_started = if self.has_probe {
            match self.board.request_temperature() {
                Ok(()) => Some(self.clock.millis()),
                Err(e) => {
                    tracing::warn!(node_id = self.settings.node_id, "temperature request failed: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        if self.settings.moisture_enabled {
            if let Some(value) = self.sample_moisture() {
                report.moisture = Some(self.report(MeasurementType::Moisture, value));
            }
        }

        if let Some(started) = conversion_started {
            let elapsed = self.clock.millis().wrapping_sub(started);
            if elapsed < self.settings.temperature_settle_ms {
                self.clock.delay_ms(self.settings.temperature_settle_ms - elapsed);
            }
            match self.board.read_temperature() {
                Ok(celsius) => {
                    let rounded = celsius.round() as i16;
                    report.temperature = Some(self.report(MeasurementType::Temperature, rounded as u16));
                }
                Err(e) => tracing::warn!(node_id = self.settings.node_id, "temperature read failed: {:#}", e),
            }
        }

        report
    }

    /// Radio off, then the long sleep in hardware-sized quanta.
    pub fn sleep(&mut self) {
        self.radio.sleep();
        for _ in 0..self.settings.sleep_quanta {
            self.board.power_down(self.settings.sleep_quantum);
        }
        self.wake_count = self.wake_count.wrapping_add(1);
    }

    /// Cycle, sleep, repeat. Does not return.
    pub fn run_forever(mut self) {
        loop {
            let report = self.run_cycle();
            tracing::debug!(node_id = self.settings.node_id, ?report, "cycle done");
            self.sleep();
        }
    }

    fn sample_moisture(&mut self) -> Option<u16> {
        if let Err(e) = self.board.set_moisture_power(true) {
            tracing::warn!(node_id = self.settings.node_id, "moisture power on failed: {:#}", e);
            return None;
        }
        self.clock.delay_ms(self.settings.moisture_settle_ms);
        let raw = self.board.read_moisture_raw();
        if let Err(e) = self.board.set_moisture_power(false) {
            tracing::warn!(node_id = self.settings.node_id, "moisture power off failed: {:#}", e);
        }
        match raw {
            // wetter soil reads lower on the probe; report it higher
            Ok(raw) => Some(self.settings.moisture_full_scale.saturating_sub(raw)),
            Err(e) => {
                tracing::warn!(node_id = self.settings.node_id, "moisture read failed: {:#}", e);
                None
            }
        }
    }

    fn report(&mut self, kind: MeasurementType, value: u16) -> Delivery {
        let tag = self.next_tag(value);
        let payload = Payload::reading(self.settings.node_id, kind, value, tag);
        tracing::info!(node_id = self.settings.node_id, ?kind, value, tag, "sending reading");

        let (attempts, acked) = self.send_with_retry(&payload);
        if acked {
            tracing::info!(node_id = self.settings.node_id, tag, attempts, "ACK received");
        } else {
            tracing::warn!(node_id = self.settings.node_id, tag, attempts, "no ACK, giving up on this reading");
        }
        Delivery { value, tag, attempts, acked }
    }

    /// `wake_count + reading + uniform(0..40000)`, 16-bit wrapping, then the
    /// generator is reseeded with the result.
    fn next_tag(&mut self, reading: u16) -> Tag {
        let tag = self.wake_count.wrapping_add(reading).wrapping_add(self.rng.gen_range(0..TAG_SPREAD));
        self.rng = StdRng::seed_from_u64(u64::from(tag));
        tag
    }

    fn send_with_retry(&mut self, payload: &Payload) -> (u8, bool) {
        let frame = payload.encode();
        let mut attempts = 0;
        while attempts < self.settings.retry_count {
            attempts += 1;
            if let Err(e) = transmit(&mut self.radio, &frame) {
                tracing::warn!(node_id = self.settings.node_id, attempt = attempts, "send failed: {}", e);
                continue;
            }
            if self.wait_for_ack() {
                return (attempts, true);
            }
            tracing::debug!(node_id = self.settings.node_id, attempt = attempts, "ACK timeout");
        }
        (attempts, false)
    }

    /// Busy-wait for an ACK addressed to us. Anything else is skipped.
    fn wait_for_ack(&mut self) -> bool {
        let started = self.clock.millis();
        let mut buf = [0u8; MAX_FRAME_LEN];
        while self.clock.millis().wrapping_sub(started) < self.settings.ack_timeout_ms {
            if !self.radio.available() {
                std::hint::spin_loop();
                continue;
            }
            let Some(len) = self.radio.recv(&mut buf) else {
                continue;
            };
            match Payload::decode(&buf[..len]) {
                Ok(p) if p.is_ack_for(self.settings.node_id) => return true,
                Ok(p) => tracing::trace!(node_id = self.settings.node_id, from = p.id, kind = ?p.kind, "ignoring frame"),
                Err(e) => tracing::trace!(node_id = self.settings.node_id, "ignoring frame: {}", e),
            }
        }
        false
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::RadioError;
    use anyhow::{bail, Result};
    use std::cell::Cell;
    use std::collections::VecDeque;

    /// Every `millis()` read advances time by one tick, so busy-waits end.
    struct ManualClock {
        now: Cell<u32>,
    }

    impl ManualClock {
        fn starting_at(t: u32) -> Self {
            Self { now: Cell::new(t) }
        }
    }

    impl Clock for ManualClock {
        fn millis(&self) -> u32 {
            let t = self.now.get();
            self.now.set(t.wrapping_add(1));
            t
        }
        fn delay_ms(&self, ms: u32) {
            self.now.set(self.now.get().wrapping_add(ms));
        }
    }

    /// Each send pops the next batch of frames that "arrive" in reply.
    #[derive(Default)]
    struct ScriptedRadio {
        replies: VecDeque<Vec<Vec<u8>>>,
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        slept: usize,
        fail_init: bool,
    }

    impl ScriptedRadio {
        fn replying(replies: Vec<Vec<Vec<u8>>>) -> Self {
            Self { replies: replies.into(), ..Default::default() }
        }
    }

    impl Radio for ScriptedRadio {
        fn init(&mut self, _: &RadioSettings) -> Result<(), RadioError> {
            if self.fail_init {
                return Err(RadioError::Init("no chip".into()));
            }
            Ok(())
        }
        fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
            self.sent.push(frame.to_vec());
            if let Some(batch) = self.replies.pop_front() {
                self.inbox.extend(batch);
            }
            Ok(())
        }
        fn wait_packet_sent(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn available(&mut self) -> bool {
            !self.inbox.is_empty()
        }
        fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
            let frame = self.inbox.pop_front()?;
            buf[..frame.len()].copy_from_slice(&frame);
            Some(frame.len())
        }
        fn sleep(&mut self) {
            self.slept += 1;
        }
    }

    struct FakeBoard {
        moisture_raw: u16,
        temperature: Option<f32>,
        powered: bool,
        power_downs: u32,
    }

    impl FakeBoard {
        fn moisture(raw: u16) -> Self {
            Self { moisture_raw: raw, temperature: None, powered: false, power_downs: 0 }
        }
    }

    impl SensorBoard for FakeBoard {
        fn set_moisture_power(&mut self, on: bool) -> Result<()> {
            self.powered = on;
            Ok(())
        }
        fn read_moisture_raw(&mut self) -> Result<u16> {
            if !self.powered {
                bail!("unpowered");
            }
            Ok(self.moisture_raw)
        }
        fn detect_temperature_probe(&mut self) -> bool {
            self.temperature.is_some()
        }
        fn request_temperature(&mut self) -> Result<()> {
            Ok(())
        }
        fn read_temperature(&mut self) -> Result<f32> {
            match self.temperature {
                Some(t) => Ok(t),
                None => bail!("no probe"),
            }
        }
        fn entropy(&mut self) -> u16 {
            1234
        }
        fn power_down(&mut self, _: Duration) {
            self.power_downs += 1;
        }
    }

    fn settings(node_id: NodeId) -> NodeSettings {
        NodeSettings::from_config(node_id, &NodeConfig::default())
    }

    fn ack(node: NodeId) -> Vec<u8> {
        Payload::ack(node).encode().to_vec()
    }

    fn node(radio: ScriptedRadio, board: FakeBoard) -> SensorNode<ScriptedRadio, ManualClock, FakeBoard> {
        // start just short of the wrap so every ACK window crosses it
        SensorNode::boot(radio, ManualClock::starting_at(u32::MAX - 40), board, settings(7), &RadioSettings::default())
    }

    #[test]
    fn moisture_is_inverted_and_acked_on_first_attempt() {
        let mut n = node(ScriptedRadio::replying(vec![vec![ack(7)]]), FakeBoard::moisture(300));

        let report = n.run_cycle();

        let d = report.moisture.unwrap();
        assert_eq!((d.value, d.attempts, d.acked), (724, 1, true));
        assert_eq!(n.radio.sent.len(), 1);
        let sent = Payload::decode(&n.radio.sent[0]).unwrap();
        assert_eq!(sent, Payload::reading(7, MeasurementType::Moisture, 724, d.tag));
        assert!(!n.board.powered);
        assert_eq!(report.temperature, None);
    }

    #[test]
    fn no_ack_means_two_identical_attempts_then_sleep() {
        let mut n = node(ScriptedRadio::default(), FakeBoard::moisture(300));

        let report = n.run_cycle();
        let d = report.moisture.unwrap();
        assert_eq!((d.attempts, d.acked), (2, false));
        assert_eq!(n.radio.sent.len(), 2);
        assert_eq!(n.radio.sent[0], n.radio.sent[1]);

        n.sleep();
        assert_eq!(n.wake_count(), 1);
        assert_eq!(n.radio.slept, 1);
        assert_eq!(n.board.power_downs, 450);
        assert_eq!(n.run_cycle().wake_count, 1);
    }

    #[test]
    fn second_attempt_can_succeed() {
        let mut n = node(ScriptedRadio::replying(vec![vec![], vec![ack(7)]]), FakeBoard::moisture(100));
        let d = n.run_cycle().moisture.unwrap();
        assert_eq!((d.attempts, d.acked), (2, true));
    }

    #[test]
    fn foreign_traffic_during_ack_wait_is_ignored() {
        let foreign = vec![
            ack(8),
            Payload::reading(9, MeasurementType::Moisture, 1, 1).encode().to_vec(),
            vec![1, 2, 3],
        ];
        let mut n = node(ScriptedRadio::replying(vec![foreign, vec![]]), FakeBoard::moisture(300));

        let d = n.run_cycle().moisture.unwrap();
        assert_eq!((d.attempts, d.acked), (2, false));

        // and an ACK for us behind the noise still counts
        let noise = vec![ack(8), ack(9), ack(7)];
        let mut n = node(ScriptedRadio::replying(vec![noise]), FakeBoard::moisture(300));
        assert!(n.run_cycle().moisture.unwrap().acked);
    }

    #[test]
    fn temperature_is_rounded_and_sent_signed_with_a_fresh_tag() {
        let board = FakeBoard { temperature: Some(-2.6), ..FakeBoard::moisture(300) };
        let mut n = node(ScriptedRadio::replying(vec![vec![ack(7)], vec![ack(7)]]), board);

        let report = n.run_cycle();

        let m = report.moisture.unwrap();
        let t = report.temperature.unwrap();
        assert_eq!(t.value as i16, -3);
        assert_ne!(m.tag, t.tag);
        let sent = Payload::decode(&n.radio.sent[1]).unwrap();
        assert_eq!(sent.kind, MeasurementType::Temperature);
        assert_eq!(sent.value, (-3i16) as u16);
    }

    #[test]
    fn temperature_waits_out_the_conversion() {
        let board = FakeBoard { temperature: Some(21.4), ..FakeBoard::moisture(0) };
        let mut n = node(ScriptedRadio::replying(vec![vec![ack(7)]]), board);
        n.settings.moisture_enabled = false;
        let before = n.clock.now.get();

        let t = n.run_cycle().temperature.unwrap();

        assert_eq!(t.value, 21);
        assert!(n.clock.now.get().wrapping_sub(before) >= n.settings.temperature_settle_ms);
    }

    #[test]
    fn tags_follow_the_reseeded_generator() {
        let mut a = node(ScriptedRadio::default(), FakeBoard::moisture(0));
        let mut b = node(ScriptedRadio::default(), FakeBoard::moisture(0));
        let (a1, b1) = (a.next_tag(724), b.next_tag(724));
        assert_eq!(a1, b1);
        let mut expected = StdRng::seed_from_u64(u64::from(a1));
        let a2 = a.next_tag(724);
        assert_eq!(a2, 724u16.wrapping_add(expected.gen_range(0..TAG_SPREAD)));
    }

    #[test]
    fn radio_init_failure_is_not_fatal() {
        let radio = ScriptedRadio { fail_init: true, ..ScriptedRadio::replying(vec![vec![ack(7)]]) };
        let mut n = node(radio, FakeBoard::moisture(300));
        assert!(n.run_cycle().moisture.unwrap().acked);
    }
}
