use serde::Serialize;

use crate::payload::{MeasurementType, NodeId, Payload};

/// a measurement the gateway forwards upstream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reading {
    /// soil moisture on the node's inverted scale (higher = wetter)
    Moisture { node: NodeId, level: u16 },
    /// whole degrees celsius
    Temperature { node: NodeId, celsius: i16 },
}

impl Reading {
    /// the forwardable reading a payload carries, if any
    pub fn from_payload(p: &Payload) -> Option<Self> {
        match p.kind {
            MeasurementType::Moisture => Some(Reading::Moisture { node: p.id, level: p.value }),
            // two's complement on the wire
            MeasurementType::Temperature => Some(Reading::Temperature { node: p.id, celsius: p.value as i16 }),
            MeasurementType::Ack | MeasurementType::Unknown(_) => None,
        }
    }

    pub fn node(&self) -> NodeId {
        match *self {
            Reading::Moisture { node, .. } | Reading::Temperature { node, .. } => node,
        }
    }
}

/// body of `POST /api/moisture`
///
/// example: {"moisture": 724, "name": 7}
#[derive(Serialize, Debug)]
pub struct MoistureReport {
    pub moisture: u16,
    pub name: NodeId,
}

/// body of `POST /api/temperature`
///
/// the collector has always received the node id as a string on this
/// endpoint only, e.g. {"temperature": 21, "name": "7"}
#[derive(Serialize, Debug)]
pub struct TemperatureReport {
    pub temperature: i16,
    pub name: String,
}
