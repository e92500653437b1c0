// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::freeze::DefrostError;
use crate::api::freeze::Freezer;
use std::net::SocketAddr;
use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;
use thiserror::Error;

pub mod crypto;
pub mod freeze;
pub mod transport;

pub use crate::connection::mocket::Mocket;
pub use crate::types::Flow;

/// Represents a point in time relative to the creation of the connection.
///
/// This is an absolute timestamp within the "Connection Epoch".
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MocketTime(Duration);

impl MocketTime {
    /// The moment the connection was created (t=0).
    pub const fn zero() -> MocketTime {
        MocketTime(Duration::ZERO)
    }

    pub const fn infinite_future() -> MocketTime {
        MocketTime(Duration::MAX)
    }

    /// Milliseconds since the connection was created, as carried in timestamp chunks.
    pub fn as_millis(&self) -> i64 {
        self.0.as_millis().min(i64::MAX as u128) as i64
    }
}

impl Add<Duration> for MocketTime {
    type Output = MocketTime;
    fn add(self, rhs: Duration) -> MocketTime {
        MocketTime(self.0.saturating_add(rhs))
    }
}

impl Sub<Duration> for MocketTime {
    type Output = MocketTime;
    fn sub(self, rhs: Duration) -> MocketTime {
        MocketTime(self.0.saturating_sub(rhs))
    }
}

impl Sub<MocketTime> for MocketTime {
    type Output = Duration;
    fn sub(self, rhs: MocketTime) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<Duration> for MocketTime {
    fn from(value: Duration) -> Self {
        MocketTime(value)
    }
}

impl From<MocketTime> for Duration {
    fn from(value: MocketTime) -> Self {
        value.0
    }
}

/// Where a message sits within a larger application-level message that the application has
/// split into several parts. The connection only carries the position, reassembly is left to
/// the application.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Fragment {
    #[default]
    Unfragmented,
    First,
    Intermediate,
    Last,
}

/// A message is a group of bytes sent and received as a whole on one of the delivery flows,
/// labelled with an application-chosen `tag`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The flow the message is, or was, sent on.
    pub flow: Flow,

    /// An application-defined tag. Outstanding messages can be cancelled by tag, see
    /// [`MocketConnection::cancel`].
    pub tag: u16,

    pub fragment: Fragment,

    /// The payload of the message.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a new, unfragmented, `Message`.
    pub fn new(flow: Flow, tag: u16, payload: Vec<u8>) -> Self {
        Message { flow, tag, fragment: Fragment::Unfragmented, payload }
    }
}

/// Represents the category of an error that has occurred.
///
/// This enum is used in [`MocketEvent::OnError`], [`MocketEvent::OnAborted`] and
/// [`MocketEvent::OnConnectionFailed`], and is returned by the blocking [`Mocket`] operations.
/// Every kind maps to a distinct negative code, see [`ErrorKind::code`].
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// An argument was out of range, or an input buffer was too short.
    #[error("invalid argument")]
    InvalidArgument,

    /// A command was received that is only possible to execute when the connection is
    /// established, but it is not.
    #[error("not connected")]
    NotConnected,

    /// The operation is not allowed in the current connection state.
    #[error("wrong state")]
    WrongState,

    /// A time-boxed operation did not complete before its deadline.
    #[error("timed out")]
    Timeout,

    /// The peer could not be reached after the configured number of attempts.
    #[error("too many retries")]
    TooManyRetries,

    /// The peer has aborted the connection.
    #[error("aborted by peer")]
    PeerReported,

    /// The peer has sent something that is not allowed at this point, such as a chunk that is
    /// unexpected during the handshake, or a packet with the wrong validation.
    #[error("protocol violation")]
    ProtocolViolation,

    /// Parsing of an incoming packet failed.
    #[error("parse failed")]
    ParseFailed,

    /// Internal buffers are exhausted.
    #[error("resource exhaustion")]
    ResourceExhaustion,

    /// A cryptographic operation failed, which typically means that the peers don't share the
    /// same secret.
    #[error("crypto failed")]
    CryptoFailed,

    /// The datagram transport failed.
    #[error("transport failed")]
    TransportFailed,

    /// Frozen connection state could not be restored.
    #[error("invalid frozen state")]
    InvalidFrozenState,
}

impl ErrorKind {
    /// The negative code returned by the blocking API for this error.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => -1,
            ErrorKind::NotConnected => -2,
            ErrorKind::WrongState => -3,
            ErrorKind::Timeout => -4,
            ErrorKind::TooManyRetries => -5,
            ErrorKind::PeerReported => -6,
            ErrorKind::ProtocolViolation => -7,
            ErrorKind::ParseFailed => -8,
            ErrorKind::ResourceExhaustion => -9,
            ErrorKind::CryptoFailed => -10,
            ErrorKind::TransportFailed => -11,
            ErrorKind::InvalidFrozenState => -12,
        }
    }
}

impl From<DefrostError> for ErrorKind {
    fn from(_: DefrostError) -> Self {
        ErrorKind::InvalidFrozenState
    }
}

/// User configurable options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Maximum packet size. The library will limit the size of generated packets to be less than
    /// or equal to this number. This does not include any overhead from UDP or IP headers. It
    /// also bounds the size of a message, as messages are never split across packets.
    pub mtu: usize,

    /// The receive window announced to the peer, in bytes. This also bounds how many bytes of
    /// reliable packets may be unacknowledged at the same time.
    pub max_window_size: u32,

    /// Size limit, in bytes, of messages that have been accepted by
    /// [`MocketConnection::send`] but not yet sent because the peer's window is full.
    pub pending_queue_size: usize,

    /// How long a connection attempt may take before it fails with [`ErrorKind::Timeout`].
    pub connect_timeout: Duration,

    /// Interval between retransmissions of INIT, COOKIE-ECHO and SIMPLE-CONNECT.
    pub connect_retry_interval: Duration,

    /// How long the blocking driver waits for a datagram before servicing its timers.
    pub receive_timeout: Duration,

    /// Default deadline for suspending a connection, including flushing outstanding data.
    pub suspend_timeout: Duration,

    /// Default deadline for resuming or re-establishing a connection.
    pub resume_timeout: Duration,

    /// Lower bound on any suspend, resume or re-establish deadline.
    pub min_suspend_resume_timeout: Duration,

    /// Interval between retransmissions of SUSPEND, RESUME and RE-ESTABLISH.
    pub suspend_resume_retry_interval: Duration,

    /// How long a graceful shutdown waits for outstanding reliable data to be acknowledged.
    pub flush_timeout: Duration,

    /// Interval between retransmissions of SHUTDOWN and SHUTDOWN-ACK.
    pub shutdown_timeout: Duration,

    /// Number of times SHUTDOWN or SHUTDOWN-ACK is sent before the connection is closed anyway.
    pub max_shutdown_attempts: u32,

    /// The maximum time from the arrival of an unacknowledged packet until a SACK is sent.
    pub sack_delay: Duration,

    /// Interval at which cancelled TSNs are re-announced while some are still outstanding.
    pub cancelled_tsn_interval: Duration,

    /// A heartbeat is sent when nothing else has been sent for this long. The peer is
    /// reported as unreachable when nothing has been received for twice this long.
    pub keep_alive_interval: Duration,

    /// How often a timestamp is attached to an outgoing packet to measure the round trip time.
    pub timestamp_interval: Duration,

    /// Initial RTO value, used until the round trip time has been measured.
    pub rto_initial: Duration,

    /// Minimum RTO value.
    pub rto_min: Duration,

    /// Maximum RTO value. Set to `None` for no limit.
    pub rto_max: Option<Duration>,

    /// The factor by which the RTO of a packet grows every time it's retransmitted.
    pub rto_backoff_factor: u32,

    /// The RTT variance is never assumed to be smaller than this, which keeps the RTO above
    /// the RTT on very stable links.
    pub min_rtt_variance: Duration,

    /// Max allowed RTT value. When the RTT is measured and it's found to be larger than this
    /// value, it will be discarded and not used for any RTO calculation.
    pub rtt_max: Duration,

    /// Length of the password that the responder generates when secrets are exchanged.
    pub password_length: usize,

    /// How long an issued state cookie remains valid.
    pub cookie_lifespan: Duration,

    /// When a packet is acknowledged, retransmit all packets that were sent before it and that
    /// are still unacknowledged right away, rather than waiting for their timeouts.
    pub detect_lost_packets: bool,

    /// Attach delivery prerequisites to sequenced packets, so that the peer delivers messages
    /// of the sequenced flows in the order they were sent, across flows.
    pub cross_sequencing: bool,

    /// Acknowledge with SACK chunks that also carry a sample of received bytes, for the peer
    /// to estimate the available bandwidth.
    pub bandwidth_estimation: bool,

    /// Exchange the suspend/resume secret already during the handshake, so that a later
    /// suspend does not need a key exchange.
    pub exchange_keys_at_connect: bool,

    /// Connect with the two-way SIMPLE-CONNECT handshake instead of the four-way handshake.
    pub simple_connect: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            mtu: 1450,
            max_window_size: 262_144,
            pending_queue_size: 32_768,
            connect_timeout: Duration::from_secs(30),
            connect_retry_interval: Duration::from_secs(1),
            receive_timeout: Duration::from_millis(250),
            suspend_timeout: Duration::from_secs(5),
            resume_timeout: Duration::from_secs(5),
            min_suspend_resume_timeout: Duration::from_millis(10),
            suspend_resume_retry_interval: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(2),
            max_shutdown_attempts: 5,
            sack_delay: Duration::from_millis(5),
            cancelled_tsn_interval: Duration::from_secs(1),
            keep_alive_interval: Duration::from_secs(1),
            timestamp_interval: Duration::from_secs(15),
            rto_initial: Duration::from_millis(100),
            rto_min: Duration::from_millis(10),
            rto_max: None,
            rto_backoff_factor: 2,
            min_rtt_variance: Duration::from_millis(10),
            rtt_max: Duration::from_secs(5),
            password_length: 8,
            cookie_lifespan: Duration::from_secs(60),
            detect_lost_packets: false,
            cross_sequencing: false,
            bandwidth_estimation: false,
            exchange_keys_at_connect: false,
            simple_connect: false,
        }
    }
}

/// Application level events generated by the connection.
#[derive(Debug)]
pub enum MocketEvent {
    /// Generated when the library wants a datagram to be sent to the given address.
    SendPacket(SocketAddr, Vec<u8>),

    /// Generated when calling [`MocketConnection::connect`] succeeds, but also for accepted
    /// incoming connections.
    OnConnected(),

    /// Generated when a connection attempt has failed. No other event will be generated after
    /// this event, unless reconnecting.
    OnConnectionFailed(ErrorKind, String),

    /// Generated when the connection has been suspended, either as requested by
    /// [`MocketConnection::suspend`] or by the peer. The connection can now be frozen.
    OnSuspended(),

    /// Generated when a suspended connection has been resumed or re-established, by either
    /// side.
    OnResumed(),

    /// Generated periodically when nothing has been heard from the peer for a while. The value
    /// is the time since the last received packet.
    OnPeerUnreachable(Duration),

    /// Like [`Self::OnPeerUnreachable`], but while the peer has suspended the connection and
    /// is expected to resume it.
    OnSuspendReceived(Duration),

    /// Generated when a packet arrives after [`Self::OnPeerUnreachable`] has been generated.
    OnPeerReachable(Duration),

    /// Generated when the connection is closed in a controlled way. No other event will be
    /// generated after this event, unless reconnecting.
    OnClosed(),

    /// Generated when the connection has aborted - either as decided by this side due to e.g. a
    /// timeout, or by the peer when receiving an ABORT command. No other events will be
    /// generated after this event, unless reconnecting.
    OnAborted(ErrorKind, String),

    /// Generated when a non-fatal error has occurred. These should be logged, but no other
    /// action need to be taken as the connection is still viable.
    OnError(ErrorKind, String),
}

/// The connection state
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// The connection is closed.
    Closed,

    /// Incoming connections are accepted.
    Listening,

    /// The connection has been initiated, but is not yet established.
    Connecting,

    /// The connection is established.
    Connected,

    /// Either side has initiated a suspension that isn't complete yet.
    Suspending,

    /// The connection is suspended and may be frozen, resumed or re-established.
    Suspended,

    /// A suspended connection is being resumed.
    Resuming,

    /// The connection is shutting down, and is not yet closed.
    ShuttingDown,
}

/// The result of a `send` operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendStatus {
    /// The message was enqueued successfully. As sending the message is done asynchronously,
    /// this is no guarantee that the message has been actually sent.
    Success,

    /// The message was rejected as it would not fit in a single packet of
    /// [`Options::mtu`] bytes.
    ErrorMessageTooLarge,

    /// The message was rejected as the connection isn't established.
    ErrorNotConnected,

    /// The message could not be enqueued as the pending queue is full.
    ErrorResourceExhaustion,

    /// The message could not be sent as the connection is shutting down or suspending.
    ErrorShuttingDown,
}

/// Tracked metrics, which is the return value of `get_metrics`.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// Number of packets sent, including retransmissions.
    pub tx_packets_count: usize,

    /// Number of messages requested to be sent.
    pub tx_messages_count: usize,

    /// Number of packets retransmitted.
    pub rtx_packets_count: usize,

    /// Number of packets received.
    pub rx_packets_count: usize,

    /// Number of messages delivered to the application.
    pub rx_messages_count: usize,

    /// Number of received packets that had already been received.
    pub rx_duplicate_packets_count: usize,

    /// Smoothed round trip time.
    pub srtt: Duration,

    /// Number of reliable packets that haven't been acknowledged yet.
    pub unack_packets_count: usize,

    /// Bytes in reliable packets that haven't been acknowledged yet.
    pub unack_bytes: usize,

    /// The peer's last announced window size.
    pub peer_window_bytes: u32,

    /// The shortest observed time from sending a packet until it was acknowledged, among
    /// packets that were never retransmitted.
    pub min_ack_time: Option<Duration>,
}

/// The sans-IO connection implements the following interface. It never performs any I/O
/// itself: datagrams are handed to it with [`Self::handle_input`], and the ones it wants to
/// send are generated as [`MocketEvent::SendPacket`].
pub trait MocketConnection {
    /// Returns the next generated event, if any.
    fn poll_event(&mut self) -> Option<MocketEvent>;

    /// Retrieves the next received message, in delivery order.
    fn get_next_message(&mut self) -> Option<Message>;

    /// Returns the number of messages that can be retrieved with [`Self::get_next_message`].
    fn messages_ready_count(&self) -> usize;

    /// To be called when a datagram has been received from `from`.
    fn handle_input(&mut self, from: SocketAddr, packet: &[u8]);

    /// Advances the internal clock to `now`, which must be measured from the creation of the
    /// connection. Time that goes backwards is ignored. Expired timers are handled.
    fn advance_time(&mut self, now: MocketTime);

    /// Returns the next absolute time when a timer expires, or
    /// `MocketTime::infinite_future()` if there are no active timers.
    fn poll_timeout(&self) -> MocketTime;

    /// Connects from `local_addr` to `remote`. This is an asynchronous operation, and
    /// [`MocketEvent::OnConnected`] or [`MocketEvent::OnConnectionFailed`] will be generated.
    fn connect(&mut self, local_addr: SocketAddr, remote: SocketAddr);

    /// Accepts a single incoming connection on `local_addr`. [`MocketEvent::OnConnected`]
    /// will be generated once a peer has completed the handshake.
    fn listen(&mut self, local_addr: SocketAddr);

    /// Enqueues `message` on its flow.
    fn send(&mut self, message: Message) -> SendStatus;

    /// Cancels all not yet acknowledged, or not yet sent, messages with the tag `tag` on the
    /// given flow. Returns the number of cancelled packets.
    fn cancel(&mut self, flow: Flow, tag: u16) -> usize;

    /// Suspends the established connection. Outstanding reliable data is flushed first. The
    /// deadline is floored at [`Options::min_suspend_resume_timeout`], and
    /// [`MocketEvent::OnSuspended`] is generated on success.
    fn suspend(&mut self, timeout: Duration);

    /// Writes the state of a suspended connection, so that it can be restored by
    /// [`crate::defrost_connection`].
    fn freeze(&self, freezer: &mut dyn Freezer) -> Result<(), ErrorKind>;

    /// Resumes a suspended connection from `local_addr`, which may differ from the address the
    /// connection was suspended at.
    fn resume(&mut self, local_addr: SocketAddr, timeout: Duration);

    /// Proves to the peer, using the exchanged secret, that this side is the same endpoint
    /// that was previously connected, typically after an abrupt change of address.
    fn reestablish(&mut self, local_addr: SocketAddr, timeout: Duration);

    /// Gracefully shuts down the connection once all outstanding reliable data has been
    /// acknowledged. [`MocketEvent::OnClosed`] is generated when done.
    fn shutdown(&mut self);

    /// Closes the connection non-gracefully. Will send ABORT if the connection is not already
    /// closed. No events will be emitted when this function has returned.
    fn close(&mut self);

    /// The connection state.
    fn state(&self) -> ConnectionState;

    /// The address that packets are currently sent to.
    fn remote_addr(&self) -> Option<SocketAddr>;

    fn options(&self) -> Options;

    /// Retrieves the latest metrics.
    ///
    /// Returns `None` if no connection has been established.
    fn get_metrics(&self) -> Option<Metrics>;
}
