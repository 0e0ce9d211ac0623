use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::link::config::LinkConfig;
use crate::link::error::DeliveryFailed;
use crate::link::message::{Message, MessageId, PayloadKind};
use crate::link::outbound::OutboundQueue;
use crate::util::sync::lock;


/// Bookkeeping for one outbound command / telemetry message awaiting its ack
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub message: Message,
    /// time of the most recent transmission
    pub sent_at: Instant,
    pub transmissions: u32,
}

#[derive(Debug, Default, PartialEq)]
pub struct SweepOutcome {
    /// messages to send again, in id order
    pub retransmit: Vec<Message>,
    /// messages that reached the configured maximum number of transmissions
    pub failed: Vec<DeliveryFailed>,
}

/// The acknowledgement state machine of one endpoint, free of I/O and clocks so it can be
///  driven directly: callers pass in the current time.
///
/// Delivery is at-least-once. A message stays pending until an ack with its id arrives, and it
///  is re-sent with the *same* id whenever its last transmission is older than `ack_timeout`.
///  Acks are never tracked themselves: a lost ack causes a retransmission, which the receiver
///  answers with a fresh ack.
pub struct DeliveryState {
    next_id: MessageId,
    pending: FxHashMap<MessageId, PendingSend>,
    ack_timeout: Duration,
    max_transmissions: Option<u32>,
    /// set once the connection is gone - nothing is accepted after that
    closed: bool,
}

impl DeliveryState {
    pub fn new(ack_timeout: Duration, max_transmissions: Option<u32>) -> DeliveryState {
        DeliveryState {
            next_id: MessageId::INITIAL,
            pending: FxHashMap::default(),
            ack_timeout,
            max_transmissions,
            closed: false,
        }
    }

    /// allocates the next id and registers the message as pending, returning it for its first
    ///  transmission. Returns [None] after [DeliveryState::abandon_all].
    pub fn submit(&mut self, kind: PayloadKind, payload: Value, now: Instant) -> Option<Message> {
        if self.closed {
            return None;
        }

        let id = self.next_id;
        self.next_id = id.next();

        let message = Message::with_payload(kind, id, payload);
        self.pending.insert(id, PendingSend {
            message: message.clone(),
            sent_at: now,
            transmissions: 1,
        });
        Some(message)
    }

    /// Returns `true` if the ack matched a pending message. Unknown ids (late or duplicate acks)
    ///  are expected under retransmission races and change nothing.
    pub fn on_ack_received(&mut self, id: MessageId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// A message is due once strictly more than `ack_timeout` passed since its last transmission
    pub fn sweep(&mut self, now: Instant) -> SweepOutcome {
        let mut due = self.pending.iter()
            .filter(|(_, p)| now.saturating_duration_since(p.sent_at) > self.ack_timeout)
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();
        due.sort();

        let mut outcome = SweepOutcome::default();
        for id in due {
            let Some(pending) = self.pending.get_mut(&id) else {
                continue;
            };

            if let Some(max_transmissions) = self.max_transmissions {
                if pending.transmissions >= max_transmissions {
                    if let Some(pending) = self.pending.remove(&id) {
                        outcome.failed.push(Self::failure(pending));
                    }
                    continue;
                }
            }

            pending.sent_at = now;
            pending.transmissions += 1;
            outcome.retransmit.push(pending.message.clone());
        }
        outcome
    }

    fn failure(pending: PendingSend) -> DeliveryFailed {
        let attempts = pending.transmissions;
        let id = pending.message.id();
        let (kind, payload) = match pending.message {
            Message::Command { payload, .. } => (PayloadKind::Command, payload),
            Message::Telemetry { payload, .. } => (PayloadKind::Telemetry, payload),
            Message::Ack { .. } => unreachable!("acks are never pending"),
        };
        DeliveryFailed { id, kind, attempts, payload }
    }

    /// Drops all pending messages, returning them in id order, and stops accepting new ones. Ids
    ///  are not preserved across connections, so pending messages can not be resumed on a new one.
    pub fn abandon_all(&mut self) -> Vec<Message> {
        self.closed = true;
        let mut abandoned = self.pending.drain()
            .map(|(_, p)| p.message)
            .collect::<Vec<_>>();
        abandoned.sort_by_key(|m| m.id());
        abandoned
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn get_pending(&self, id: MessageId) -> Option<&PendingSend> {
        self.pending.get(&id)
    }
}


/// The reliable delivery engine as shared between the collaborator-facing API, the dispatcher
///  and the timeout sweeper.
///
/// Submit, sweep and ack handling are serialized by one lock around [DeliveryState]. A
///  message is queued for its first transmission while that lock is held, so a sweep can never
///  overtake the first transmission of the message it is looking at.
pub struct ReliableDelivery {
    state: Mutex<DeliveryState>,
    outbound: Arc<OutboundQueue>,
    failures: Mutex<VecDeque<DeliveryFailed>>,
}

impl ReliableDelivery {
    pub fn new(config: &LinkConfig, outbound: Arc<OutboundQueue>) -> ReliableDelivery {
        ReliableDelivery {
            state: Mutex::new(DeliveryState::new(config.ack_timeout, config.max_transmissions)),
            outbound,
            failures: Default::default(),
        }
    }

    /// Non-blocking: the message is queued for sending, and the caller never waits for the peer.
    ///  Returns [None] if the connection is closed, in which case the payload is dropped.
    pub fn submit(&self, kind: PayloadKind, payload: Value) -> Option<MessageId> {
        let mut state = lock(&self.state);
        let Some(message) = state.submit(kind, payload, Instant::now()) else {
            warn!("connection is closed - dropping submitted {:?}", kind);
            return None;
        };
        let id = message.id();
        debug!("submitting {:?} {:?}", kind, id);
        self.outbound.push(message);
        Some(id)
    }

    pub fn on_ack_received(&self, id: MessageId) {
        if lock(&self.state).on_ack_received(id) {
            debug!("received ack for {:?}", id);
        }
        else {
            trace!("ignoring ack for {:?} which is not pending - late or duplicate", id);
        }
    }

    pub fn sweep(&self) {
        let mut state = lock(&self.state);
        let outcome = state.sweep(Instant::now());
        if !outcome.retransmit.is_empty() {
            debug!("retransmitting unacknowledged messages {:?}", outcome.retransmit.iter().map(|m| m.id()).collect::<Vec<_>>());
            self.outbound.extend(outcome.retransmit);
        }
        drop(state);

        if !outcome.failed.is_empty() {
            let mut failures = lock(&self.failures);
            for failed in outcome.failed {
                warn!("giving up: {}", failed);
                failures.push_back(failed);
            }
        }
    }

    /// called when the connection is gone: pending messages are abandoned, their delivery
    ///  status is unknown
    pub fn on_connection_closed(&self) -> Vec<Message> {
        let abandoned = lock(&self.state).abandon_all();
        if !abandoned.is_empty() {
            warn!("connection closed with {} unacknowledged messages, abandoning {:?}", abandoned.len(), abandoned.iter().map(|m| m.id()).collect::<Vec<_>>());
        }
        abandoned
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending_count()
    }

    pub fn pop_delivery_failure(&self) -> Option<DeliveryFailed> {
        lock(&self.failures).pop_front()
    }
}
