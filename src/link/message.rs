use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;


/// Identifies a message among the messages in flight from one sender. Station and robot each
///  allocate ids from their own counter, so ids are only unique per direction.
///
/// An [MessageKind::Ack] carries the id of the message it acknowledges rather than an id of
///  its own.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const INITIAL: MessageId = MessageId(0);

    pub fn next(self) -> MessageId {
        MessageId(self.0.wrapping_add(1))
    }
}

impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MessageKind {
    Command,
    Telemetry,
    Ack,
}

/// The kinds of message that carry application data - these are the ones that are tracked
///  for acknowledgement, and the ones that are delivered to collaborators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PayloadKind {
    Command,
    Telemetry,
}

impl From<PayloadKind> for MessageKind {
    fn from(value: PayloadKind) -> Self {
        match value {
            PayloadKind::Command => MessageKind::Command,
            PayloadKind::Telemetry => MessageKind::Telemetry,
        }
    }
}


/// The unit of communication on the link. Its serialized form is a single JSON object, e.g.
///
/// ```text
/// {"type":"command","id":4,"data":{"mode":"TELEOP"}}
/// {"type":"ack","id":4}
/// ```
///
/// A missing or `null` `data` field on a command / telemetry frame decodes as [Value::Null].
///  `data` on an ack frame is ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Command {
        id: MessageId,
        #[serde(rename = "data", default)]
        payload: Value,
    },
    Telemetry {
        id: MessageId,
        #[serde(rename = "data", default)]
        payload: Value,
    },
    Ack {
        id: MessageId,
    },
}

impl Message {
    pub fn with_payload(kind: PayloadKind, id: MessageId, payload: Value) -> Message {
        match kind {
            PayloadKind::Command => Message::Command { id, payload },
            PayloadKind::Telemetry => Message::Telemetry { id, payload },
        }
    }

    pub fn ack(id: MessageId) -> Message {
        Message::Ack { id }
    }

    pub fn id(&self) -> MessageId {
        match self {
            Message::Command { id, .. } => *id,
            Message::Telemetry { id, .. } => *id,
            Message::Ack { id } => *id,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Command { .. } => MessageKind::Command,
            Message::Telemetry { .. } => MessageKind::Telemetry,
            Message::Ack { .. } => MessageKind::Ack,
        }
    }

    /// [None] for acks
    pub fn payload_kind(&self) -> Option<PayloadKind> {
        match self {
            Message::Command { .. } => Some(PayloadKind::Command),
            Message::Telemetry { .. } => Some(PayloadKind::Telemetry),
            Message::Ack { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Message::Command { payload, .. } => Some(payload),
            Message::Telemetry { payload, .. } => Some(payload),
            Message::Ack { .. } => None,
        }
    }
}


/// Application data as it is handed to a collaborator, tagged with the id it arrived with
///  for diagnostics. The same id may be delivered more than once if an ack got lost.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    pub id: MessageId,
    pub payload: Value,
}
