use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::bail;
use tracing::warn;


/// The well-known port the robot listens on
pub const DEFAULT_PORT: u16 = 6767;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// The robot's listening address. A robot binds to it, a station connects to it.
    pub addr: SocketAddr,

    /// A message that is not acknowledged within this time is retransmitted at the next sweep
    pub ack_timeout: Duration,
    /// period of the timeout sweep
    pub poll_interval: Duration,
    /// Upper bound for the sender waiting on an empty outbound queue before re-checking for
    ///  shutdown
    pub send_wait: Duration,

    /// Longest frame (excluding the delimiter) that is accepted. Longer frames are reported as
    ///  decode errors and skipped, the connection stays up.
    pub max_frame_len: usize,

    /// [None] retransmits until acknowledged or disconnected. With `Some(n)`, a message is sent
    ///  at most `n` times and then reported as failed.
    pub max_transmissions: Option<u32>,

    /// robot only: accept and immediately close connection attempts after the first one
    pub reject_extra_connections: bool,
}

impl LinkConfig {
    pub fn new(addr: SocketAddr) -> LinkConfig {
        LinkConfig {
            addr,
            ack_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(200),
            send_wait: Duration::from_secs(1),
            max_frame_len: 64*1024,
            max_transmissions: None,
            reject_extra_connections: true,
        }
    }

    /// listening on all interfaces on the default port
    pub fn default_robot() -> LinkConfig {
        Self::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ack_timeout.is_zero() {
            bail!("ack timeout must be positive");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must be positive");
        }
        if self.send_wait.is_zero() {
            bail!("send wait must be positive");
        }
        if self.max_frame_len < 64 {
            bail!("maximum frame length of {} bytes is too small", self.max_frame_len);
        }
        if self.max_transmissions == Some(0) {
            bail!("maximum number of transmissions must be at least 1");
        }

        if self.poll_interval > self.ack_timeout {
            warn!("poll interval {:?} is longer than ack timeout {:?} - retransmissions will be late", self.poll_interval, self.ack_timeout);
        }
        Ok(())
    }
}
