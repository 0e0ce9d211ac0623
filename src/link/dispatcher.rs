use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::link::delivery::ReliableDelivery;
use crate::link::message::{Inbound, Message, MessageId, PayloadKind};
use crate::link::outbound::OutboundQueue;
use crate::util::sync::lock;


/// Routes decoded messages: acks go to the delivery engine, commands and telemetry go to the
///  inbound queue of their kind and are acknowledged right away.
///
/// Acks are put on the outbound queue directly, bypassing the delivery engine - they are never
///  tracked or retried. If an ack gets lost, the peer retransmits, and the retransmission is
///  delivered and acked again. Collaborators must therefore tolerate duplicates (same id).
pub struct Dispatcher {
    delivery: Arc<ReliableDelivery>,
    outbound: Arc<OutboundQueue>,
    commands: Mutex<VecDeque<Inbound>>,
    telemetry: Mutex<VecDeque<Inbound>>,
}

impl Dispatcher {
    pub fn new(delivery: Arc<ReliableDelivery>, outbound: Arc<OutboundQueue>) -> Dispatcher {
        Dispatcher {
            delivery,
            outbound,
            commands: Default::default(),
            telemetry: Default::default(),
        }
    }

    pub fn on_message_decoded(&self, msg: Message) {
        trace!("dispatching {:?}", msg);

        match msg {
            Message::Ack { id } => self.delivery.on_ack_received(id),
            Message::Command { id, payload } => self.deliver(PayloadKind::Command, Inbound { id, payload }),
            Message::Telemetry { id, payload } => self.deliver(PayloadKind::Telemetry, Inbound { id, payload }),
        }
    }

    fn deliver(&self, kind: PayloadKind, inbound: Inbound) {
        let id: MessageId = inbound.id;
        debug!("received {:?} {:?}", kind, id);

        lock(self.queue(kind)).push_back(inbound);
        self.outbound.push(Message::ack(id));
    }

    fn queue(&self, kind: PayloadKind) -> &Mutex<VecDeque<Inbound>> {
        match kind {
            PayloadKind::Command => &self.commands,
            PayloadKind::Telemetry => &self.telemetry,
        }
    }

    /// non-blocking, [None] if nothing arrived
    pub fn pop_inbound(&self, kind: PayloadKind) -> Option<Inbound> {
        lock(self.queue(kind)).pop_front()
    }

    pub fn inbound_len(&self, kind: PayloadKind) -> usize {
        lock(self.queue(kind)).len()
    }

    /// Queued outbound frames are discarded along with the pending sends. Inbound data that
    ///  already arrived stays available to collaborators.
    pub fn on_connection_closed(&self) {
        // no submission can reach the outbound queue once the delivery engine is closed
        self.delivery.on_connection_closed();

        let discarded = self.outbound.clear();
        if discarded > 0 {
            debug!("discarding {} queued outbound frames", discarded);
        }
    }
}
