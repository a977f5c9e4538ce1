//! garden-telemetry: battery sensor nodes reporting over a lossy packet
//! radio, a gateway relaying their readings to an HTTP collector, and a
//! water-interlocked pump controller.
//!
//! the binary in main.rs picks one role per process; everything it runs is
//! built from the modules below.

pub mod config;
pub mod dedup;
pub mod domain;
pub mod forward;
pub mod gateway;
pub mod hal;
pub mod irrigation;
pub mod node;
pub mod payload;
pub mod radio;
