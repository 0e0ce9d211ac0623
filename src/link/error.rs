use serde_json::Value;
use thiserror::Error;

use crate::link::message::{MessageId, PayloadKind};


/// A problem with a single received frame. It never affects the connection: the frame is
///  dropped and decoding resumes after the next delimiter.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame exceeds the maximum length of {max_len} bytes - discarding up to the next delimiter")]
    TooLong { max_len: usize },
}


/// Reported when bounded retransmission is configured and a message was sent the maximum
///  number of times without being acknowledged. The message is no longer retransmitted.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?} {id:?} was not acknowledged after {attempts} transmissions")]
pub struct DeliveryFailed {
    pub id: MessageId,
    pub kind: PayloadKind,
    pub attempts: u32,
    pub payload: Value,
}
