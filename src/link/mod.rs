//! A reliable command / telemetry link between a station and a robot over a single TCP
//!  connection. Frames are newline-delimited JSON, every command and telemetry message is
//!  acknowledged by the receiving side and retransmitted by the sender until it is.

pub mod activities;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod frame_codec;
pub mod message;
pub mod outbound;

pub use config::{LinkConfig, DEFAULT_PORT};
pub use endpoint::{Endpoint, Robot, RobotListener, Role, Station};
pub use error::{DeliveryFailed, FrameError};
pub use message::{Inbound, Message, MessageId, MessageKind, PayloadKind};
