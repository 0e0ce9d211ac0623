//! The three concurrent activities of a connected endpoint. They share nothing but the queues,
//!  the delivery engine and the [Connection], and each of them ends when the connection is
//!  closed - by `stop()`, by the peer, or by an I/O error detected in any of them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::link::connection::Connection;
use crate::link::delivery::ReliableDelivery;
use crate::link::dispatcher::Dispatcher;
use crate::link::frame_codec::FrameCodec;
use crate::link::outbound::OutboundQueue;


const READ_BUFFER_CAPACITY: usize = 8*1024;

/// This is an abstraction for writing encoded frames to the stream, introduced to facilitate
///  mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_frames(&mut self, buf: &[u8]) -> anyhow::Result<()>;

    /// shuts down the sending direction of the stream
    async fn shutdown(&mut self);
}

pub struct TcpFrameWriter {
    write_half: OwnedWriteHalf,
}

impl TcpFrameWriter {
    pub fn new(write_half: OwnedWriteHalf) -> TcpFrameWriter {
        TcpFrameWriter { write_half }
    }
}

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frames(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.write_half.write_all(buf).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.write_half.shutdown().await {
            debug!("error shutting down the stream: {}", e);
        }
    }
}


/// Reads until end-of-stream, an I/O error or the connection being closed, handing every
///  decoded message to the dispatcher. Undecodable frames are logged and skipped.
///
/// This is the activity that detects the peer going away. Whatever the reason for ending, it
///  closes the connection and lets the dispatcher abandon everything that was still outbound.
pub async fn receive_loop<R: AsyncRead + Unpin + Send>(
    mut reader: R,
    mut codec: FrameCodec,
    dispatcher: Arc<Dispatcher>,
    connection: Arc<Connection>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);

    loop {
        buf.reserve(READ_BUFFER_CAPACITY);

        let read_result = select! {
            r = reader.read_buf(&mut buf) => r,
            _ = connection.closed() => {
                debug!("receiver stopped");
                break;
            }
        };

        match read_result {
            Ok(0) => {
                info!("end of stream - peer closed the connection");
                if !buf.is_empty() {
                    debug!("discarding {} bytes of an incomplete frame", buf.len());
                }
                break;
            }
            Ok(num_read) => {
                trace!("read {} bytes", num_read);
                while let Some(decoded) = codec.decode(&mut buf) {
                    match decoded {
                        Ok(msg) => dispatcher.on_message_decoded(msg),
                        Err(e) => warn!("dropping frame: {}", e),
                    }
                }
            }
            Err(e) => {
                warn!("error reading from stream: {}", e);
                break;
            }
        }
    }

    if connection.close() {
        info!("connection closed");
    }
    dispatcher.on_connection_closed();
}


/// Drains the outbound queue and writes its messages in queue order, one write per batch.
///  Waits for new messages at most `send_wait` at a time. A write error closes the connection.
pub async fn send_loop(
    mut writer: Box<dyn FrameWriter>,
    outbound: Arc<OutboundQueue>,
    connection: Arc<Connection>,
    send_wait: Duration,
) {
    let mut buf = BytesMut::new();

    while connection.is_connected() {
        let batch = outbound.drain();
        if batch.is_empty() {
            select! {
                _ = outbound.wait_for_messages(send_wait) => {}
                _ = connection.closed() => break,
            }
            continue;
        }

        buf.clear();
        for msg in &batch {
            if let Err(e) = FrameCodec::encode(msg, &mut buf) {
                error!("failed to encode {:?} {:?} - skipping: {}", msg.kind(), msg.id(), e);
            }
        }
        trace!("sending {} frames", batch.len());

        select! {
            result = writer.write_frames(&buf) => {
                if let Err(e) = result {
                    warn!("error writing to stream: {}", e);
                    if connection.close() {
                        info!("connection closed");
                    }
                    break;
                }
            }
            _ = connection.closed() => break,
        }
    }

    debug!("sender stopped");
    writer.shutdown().await;
}


/// Runs the delivery engine's timeout sweep every `poll_interval`
pub async fn sweep_loop(delivery: Arc<ReliableDelivery>, connection: Arc<Connection>, poll_interval: Duration) {
    let mut ticks = time::interval(poll_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticks.tick().await;

    loop {
        select! {
            _ = ticks.tick() => delivery.sweep(),
            _ = connection.closed() => break,
        }
    }
    debug!("timeout sweeper stopped");
}
