//! The payloads exchanged between the operator station and the robot. The link itself treats
//!  payloads as opaque JSON; this is the schema both sides agree on.

pub mod commands;
pub mod telemetry;

pub use commands::{AxisFilter, Button, ControlCommand, Mode};
pub use telemetry::Telemetry;
