use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use crate::link::activities::{receive_loop, send_loop, sweep_loop, TcpFrameWriter};
use crate::link::config::LinkConfig;
use crate::link::connection::{connect, Connection, Listener};
use crate::link::delivery::ReliableDelivery;
use crate::link::dispatcher::Dispatcher;
use crate::link::error::DeliveryFailed;
use crate::link::frame_codec::FrameCodec;
use crate::link::message::{Inbound, MessageId, PayloadKind};
use crate::link::outbound::OutboundQueue;
use crate::util::sync::lock;


#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Station,
    Robot,
}

/// One end of an established link, with its receiver, sender and timeout sweeper running as
///  tokio tasks. All collaborator-facing operations are synchronous and never block on the
///  network.
///
/// An endpoint serves exactly one connection. Once it is closed, there is no reconnect: a new
///  endpoint has to be started, and ids start over.
pub struct Endpoint {
    role: Role,
    connection: Arc<Connection>,
    delivery: Arc<ReliableDelivery>,
    dispatcher: Arc<Dispatcher>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Endpoint {
    /// Takes over an established stream whose addresses were already read, so that nothing can
    ///  fail once `tasks` is handed in.
    fn start(role: Role, config: &LinkConfig, stream: TcpStream, peer_addr: SocketAddr, local_addr: SocketAddr, connection: Arc<Connection>, mut tasks: Vec<JoinHandle<()>>) -> Endpoint {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {}", e);
        }
        let (read_half, write_half) = stream.into_split();

        let outbound = Arc::new(OutboundQueue::new());
        let delivery = Arc::new(ReliableDelivery::new(config, outbound.clone()));
        let dispatcher = Arc::new(Dispatcher::new(delivery.clone(), outbound.clone()));

        connection.mark_connected();

        let span = info_span!("link", role = ?role, peer = %peer_addr);
        tasks.push(tokio::spawn(
            receive_loop(read_half, FrameCodec::new(config.max_frame_len), dispatcher.clone(), connection.clone())
                .instrument(span.clone())
        ));
        tasks.push(tokio::spawn(
            send_loop(Box::new(TcpFrameWriter::new(write_half)), outbound, connection.clone(), config.send_wait)
                .instrument(span.clone())
        ));
        tasks.push(tokio::spawn(
            sweep_loop(delivery.clone(), connection.clone(), config.poll_interval)
                .instrument(span)
        ));

        Endpoint {
            role,
            connection,
            delivery,
            dispatcher,
            peer_addr,
            local_addr,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Queues a payload for reliable delivery and returns its id, or [None] if the connection
    ///  is closed and the payload was dropped.
    pub fn submit(&self, kind: PayloadKind, payload: Value) -> Option<MessageId> {
        self.delivery.submit(kind, payload)
    }

    /// non-blocking poll, returning the oldest received message of the given kind
    pub fn pop_inbound(&self, kind: PayloadKind) -> Option<Inbound> {
        self.dispatcher.pop_inbound(kind)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Closes the connection and signals all activities to stop. This returns immediately; the
    ///  activities observe the signal asynchronously, see [Endpoint::shutdown] for waiting on
    ///  them. Calling this repeatedly or on an already broken connection is harmless.
    pub fn stop(&self) {
        if self.connection.close() {
            info!("stopping {:?} link to {}", self.role, self.peer_addr);
        }
    }

    /// resolves when the connection is closed, either locally or by the peer
    pub async fn closed(&self) {
        self.connection.closed().await
    }

    /// [Endpoint::stop], then waits for the activities to terminate
    pub async fn shutdown(&self) {
        self.stop();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                error!("link activity terminated abnormally: {}", e);
            }
        }
        debug!("all link activities terminated");
    }

    /// the number of submitted messages that are not acknowledged yet
    pub fn pending_count(&self) -> usize {
        self.delivery.pending_count()
    }

    /// Non-blocking poll for messages that were given up on. This only ever returns something
    ///  if [LinkConfig::max_transmissions] is set.
    pub fn pop_delivery_failure(&self) -> Option<DeliveryFailed> {
        self.delivery.pop_delivery_failure()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.stop();
    }
}


/// The operator side: connects to the robot, sends commands and receives telemetry
pub struct Station {
    endpoint: Endpoint,
}

impl Station {
    /// A single connection attempt. Failure is returned to the caller, who may retry - each
    ///  attempt is independent.
    pub async fn connect(config: &LinkConfig) -> anyhow::Result<Station> {
        config.validate()?;

        let stream = connect(config).await?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let endpoint = Endpoint::start(Role::Station, config, stream, peer_addr, local_addr, Arc::new(Connection::new()), Vec::new());
        Ok(Station { endpoint })
    }

    pub fn submit_command(&self, payload: Value) -> Option<MessageId> {
        self.endpoint.submit(PayloadKind::Command, payload)
    }

    pub fn get_next_telemetry(&self) -> Option<Value> {
        self.endpoint.pop_inbound(PayloadKind::Telemetry)
            .map(|inbound| inbound.payload)
    }
}

impl Deref for Station {
    type Target = Endpoint;

    fn deref(&self) -> &Endpoint {
        &self.endpoint
    }
}


/// The robot's bound listening socket, waiting for the station
pub struct RobotListener {
    listener: Listener,
    config: LinkConfig,
}

impl RobotListener {
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// waits for the station to connect, and serves that one connection
    pub async fn accept(self) -> anyhow::Result<Robot> {
        let connection = Arc::new(Connection::new());
        let accepted = self.listener.accept(connection.clone()).await?;

        let endpoint = Endpoint::start(Role::Robot, &self.config, accepted.stream, accepted.peer_addr, accepted.local_addr, connection, accepted.rejecter.into_iter().collect());
        Ok(Robot { endpoint })
    }
}


/// The vehicle side: accepts one station connection, receives commands and sends telemetry
pub struct Robot {
    endpoint: Endpoint,
}

impl Robot {
    /// binding is fatal for startup, so the error is meant to be propagated
    pub async fn bind(config: &LinkConfig) -> anyhow::Result<RobotListener> {
        config.validate()?;

        let listener = Listener::bind(config).await?;
        Ok(RobotListener {
            listener,
            config: config.clone(),
        })
    }

    /// bind and accept in one step
    pub async fn start(config: &LinkConfig) -> anyhow::Result<Robot> {
        Self::bind(config).await?
            .accept().await
    }

    pub fn submit_telemetry(&self, payload: Value) -> Option<MessageId> {
        self.endpoint.submit(PayloadKind::Telemetry, payload)
    }

    pub fn get_next_command(&self) -> Option<Value> {
        self.endpoint.pop_inbound(PayloadKind::Command)
            .map(|inbound| inbound.payload)
    }
}

impl Deref for Robot {
    type Target = Endpoint;

    fn deref(&self) -> &Endpoint {
        &self.endpoint
    }
}
