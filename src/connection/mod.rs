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

use crate::EventSink;
use crate::api::ConnectionState;
use crate::api::ErrorKind;
use crate::api::Message;
use crate::api::Metrics;
use crate::api::MocketConnection;
use crate::api::MocketEvent;
use crate::api::MocketTime;
use crate::api::Options;
use crate::api::SendStatus;
use crate::api::crypto::CryptoProvider;
use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use crate::connection::context::Context;
use crate::connection::state::State;
use crate::connection::transmission_control_block::TransmissionControlBlock;
use crate::events::Events;
use crate::logging::log_packet;
use crate::packet::chunk::Chunk;
use crate::packet::mocket_packet::MocketPacket;
use crate::packet::mocket_packet::PacketHeader;
use crate::timer;
use crate::types::Flow;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
use std::cell::RefCell;
use std::net::SocketAddr;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;
use std::rc::Rc;
use std::time::Duration;

pub(crate) mod connect;
pub(crate) mod context;
pub(crate) mod data;
pub(crate) mod heartbeat;
pub mod mocket;
pub(crate) mod shutdown;
pub(crate) mod state;
pub(crate) mod state_cookie;
pub(crate) mod suspend;
pub(crate) mod transmission_control_block;


struct LoggingEvents {
    parent: Rc<RefCell<dyn EventSink>>,
    name: String,
    now: Rc<RefCell<MocketTime>>,
}

impl LoggingEvents {
    pub fn new(
        parent: Rc<RefCell<dyn EventSink>>,
        name: String,
        now: Rc<RefCell<MocketTime>>,
    ) -> LoggingEvents {
        Self { parent, name, now }
    }
}

impl EventSink for LoggingEvents {
    fn add(&mut self, event: MocketEvent) {
        match event {
            MocketEvent::SendPacket(_, ref packet) => {
                let now = *self.now.borrow();
                log_packet(&self.name, now.into(), true, packet);
            }
            MocketEvent::OnConnected() => info!("{}: OnConnected", self.name),
            MocketEvent::OnConnectionFailed(kind, ref e) => {
                info!("{}: OnConnectionFailed({:?}, {})", self.name, kind, e);
            }
            MocketEvent::OnSuspended() => info!("{}: OnSuspended", self.name),
            MocketEvent::OnResumed() => info!("{}: OnResumed", self.name),
            MocketEvent::OnPeerUnreachable(d) => {
                info!("{}: OnPeerUnreachable({:?})", self.name, d);
            }
            MocketEvent::OnSuspendReceived(d) => {
                info!("{}: OnSuspendReceived({:?})", self.name, d);
            }
            MocketEvent::OnPeerReachable(d) => info!("{}: OnPeerReachable({:?})", self.name, d),
            MocketEvent::OnClosed() => info!("{}: OnClosed", self.name),
            MocketEvent::OnAborted(kind, ref e) => {
                info!("{}: OnAborted({:?}, {})", self.name, kind, e);
            }
            MocketEvent::OnError(kind, ref e) => info!("{}: OnError({:?}, {})", self.name, kind, e),
        }
        self.parent.borrow_mut().add(event);
    }

    fn next_event(&mut self) -> Option<MocketEvent> {
        self.parent.borrow_mut().next_event()
    }
}

/// A mockets connection.
///
/// The connection is sans-IO: it is fed received datagrams and the current time, and asks for
/// datagrams to be sent through [`MocketEvent::SendPacket`]. It is created by
/// [`crate::new_connection`], or by [`crate::defrost_connection`] from a frozen suspended
/// connection.
pub struct Connection {
    name: String,
    now: Rc<RefCell<MocketTime>>,
    state: State,
    ctx: Context,
}

impl Connection {
    /// Creates a new, closed, `Connection`. The provided `name` is only used for logging.
    pub fn new(name: &str, options: &Options, crypto: Box<dyn CryptoProvider>) -> Self {
        let now = Rc::new(RefCell::new(MocketTime::zero()));
        let events: Rc<RefCell<Events>> = Rc::new(RefCell::new(Events::new()));
        let events: Rc<RefCell<dyn EventSink>> =
            Rc::new(RefCell::new(LoggingEvents::new(events, name.into(), Rc::clone(&now))));
        let ctx = Context::new(name, options, events, crypto);
        Connection { name: name.into(), now, state: State::Closed, ctx }
    }

    /// Restores a connection that was frozen while suspended. Its clock restarts at zero, and
    /// it can be resumed with [`MocketConnection::resume`].
    pub fn defrost(
        name: &str,
        options: &Options,
        crypto: Box<dyn CryptoProvider>,
        defroster: &mut dyn Defroster,
    ) -> Result<Self, DefrostError> {
        let tcb = TransmissionControlBlock::defrost(options, defroster, MocketTime::zero())?;
        let mut connection = Self::new(name, options, crypto);
        info!("{}: Defrosted connection to {}", name, tcb.remote_addr);
        connection.state = State::Suspended(tcb);
        Ok(connection)
    }

    fn now(&self) -> MocketTime {
        *self.now.borrow()
    }

    /// Handles a packet in the states where data flows, which are those where the connection
    /// is established, or suspending or shutting down with data still being flushed.
    fn handle_live_packet(&mut self, now: MocketTime, from: SocketAddr, mut packet: MocketPacket) {
        let Some(tcb) = self.state.tcb_mut() else { return };
        let from_peer =
            packet.header.validation == tcb.local.validation && from == tcb.remote_addr;
        if from_peer {
            heartbeat::peer_heard(tcb, &self.ctx, now);
            tcb.peer_window = packet.header.window_size;
            if let Some(chunk) = packet.take_data_chunk() {
                data::handle_data(tcb, &mut self.ctx, now, &packet, chunk);
            }
        }

        let header = packet.header;
        for chunk in packet.chunks {
            if !self.state.is_live() {
                return;
            }
            if !from_peer {
                // RESUME, REESTABLISH and SIMPLE-CONNECT carry their own proof of identity.
                match chunk {
                    Chunk::Resume(_) | Chunk::ReEstablish(_) => suspend::handle_resume(
                        &mut self.state,
                        &mut self.ctx,
                        now,
                        from,
                        &header,
                        chunk,
                    ),
                    Chunk::SimpleConnect(c) if header.validation == 0 => {
                        if let State::Established(tcb) = &self.state {
                            let ctx = &mut self.ctx;
                            connect::handle_duplicate_simple_connect(tcb, ctx, now, from, c);
                        }
                    }
                    chunk => {
                        let name = &self.name;
                        warn!("{}: Dropping {} from {}, unexpected identity", name, chunk, from);
                    }
                }
                continue;
            }
            self.handle_live_chunk(now, from, &header, chunk);
        }
    }

    fn handle_live_chunk(
        &mut self,
        now: MocketTime,
        from: SocketAddr,
        header: &PacketHeader,
        chunk: Chunk,
    ) {
        let state = &mut self.state;
        let ctx = &mut self.ctx;
        match chunk {
            Chunk::Sack(c) => {
                if let Some(tcb) = state.tcb_mut() {
                    data::handle_sack(tcb, ctx, now, &c);
                }
            }
            Chunk::Cancelled(c) => {
                if let Some(tcb) = state.tcb_mut() {
                    data::handle_cancelled(tcb, ctx, now, &c);
                }
            }
            Chunk::Timestamp(c) => {
                if let Some(tcb) = state.tcb_mut() {
                    heartbeat::handle_timestamp(tcb, now, c);
                }
            }
            Chunk::TimestampAck(c) => {
                if let Some(tcb) = state.tcb_mut() {
                    heartbeat::handle_timestamp_ack(tcb, now, c);
                }
            }
            Chunk::Heartbeat(_) => {
                // Only proves that the peer is alive, which has already been noted.
            }
            Chunk::Abort(_) => {
                ctx.internal_close(state, Some(ErrorKind::PeerReported), "Aborted by peer".into());
            }
            Chunk::CookieEcho(c) => {
                if let State::Established(tcb) = state {
                    connect::handle_duplicate_cookie_echo(tcb, ctx, now, c);
                }
            }
            Chunk::Suspend(c) => suspend::handle_suspend(state, ctx, now, Some(c.key_data)),
            Chunk::SimpleSuspend(_) => suspend::handle_suspend(state, ctx, now, None),
            Chunk::SuspendAck(c) => {
                suspend::handle_suspend_ack(state, ctx, Some(c.encrypted_secret));
            }
            Chunk::SimpleSuspendAck(_) => suspend::handle_suspend_ack(state, ctx, None),
            Chunk::Resume(_) | Chunk::ReEstablish(_) => {
                suspend::handle_resume(state, ctx, now, from, header, chunk);
            }
            Chunk::Shutdown(_) => shutdown::handle_shutdown(state, ctx, now),
            Chunk::ShutdownAck(_) => shutdown::handle_shutdown_ack(state, ctx),
            Chunk::ShutdownComplete(_) => shutdown::handle_shutdown_complete(state, ctx),
            chunk => info!("{}: Ignoring {}", ctx.name, chunk),
        }
    }

    /// Sends what has become possible to send after handling input or timers.
    fn progress(&mut self, now: MocketTime) {
        if let Some(tcb) = self.state.live_tcb_mut() {
            data::drain_pending(tcb, &mut self.ctx, now);
            data::maybe_send_sack(tcb, &mut self.ctx, now);
        }
        suspend::progress_suspend(&mut self.state, &mut self.ctx, now);
        shutdown::progress_shutdown(&mut self.state, &mut self.ctx, now);
    }
}

impl MocketConnection for Connection {
    fn poll_event(&mut self) -> Option<MocketEvent> {
        self.ctx.events.borrow_mut().next_event()
    }

    fn get_next_message(&mut self) -> Option<Message> {
        self.state.tcb_mut()?.receive_queue.next_message()
    }

    fn messages_ready_count(&self) -> usize {
        let Some(tcb) = self.state.tcb() else {
            return 0;
        };
        tcb.receive_queue.messages_ready_count()
    }

    fn handle_input(&mut self, from: SocketAddr, packet: &[u8]) {
        self.ctx.rx_packets_count += 1;
        let now = self.now();
        log_packet(&self.name, now.into(), false, packet);

        let packet = match MocketPacket::from_bytes(packet) {
            Ok(packet) => packet,
            Err(e) => {
                self.ctx.emit(MocketEvent::OnError(
                    ErrorKind::ParseFailed,
                    format!("Failed to parse packet from {from}: {e}"),
                ));
                return;
            }
        };
        let state = &mut self.state;
        let ctx = &mut self.ctx;
        match state {
            State::Closed => info!("{}: Ignoring packet from {} while closed", ctx.name, from),
            State::Listening => connect::handle_listening_packet(state, ctx, now, from, packet),
            State::CookieWait(_) | State::CookieEchoed(_) | State::SimpleConnectSent(_) => {
                connect::handle_handshake_packet(state, ctx, now, from, packet);
            }
            State::SuspendReceived(_) => {
                suspend::handle_suspend_received_packet(state, ctx, now, from, packet);
            }
            State::Suspended(_) => suspend::handle_suspended_packet(state, ctx, from, packet),
            State::ResumeSent(_) | State::ReEstablishSent(_) => {
                suspend::handle_resuming_packet(state, ctx, now, from, packet);
            }
            _ => {
                debug_assert!(state.is_live());
                self.handle_live_packet(now, from, packet);
            }
        }
        self.progress(now);
    }

    fn advance_time(&mut self, now: MocketTime) {
        if now < self.now() {
            // Time is not allowed to go backwards.
            return;
        }
        self.now.replace(now);
        connect::handle_connect_timeouts(&mut self.state, &mut self.ctx, now);
        suspend::handle_suspend_timeouts(&mut self.state, &mut self.ctx, now);
        if let Some(tcb) = self.state.live_tcb_mut() {
            data::retransmit_timed_out(tcb, &mut self.ctx, now);
        }
        heartbeat::handle_heartbeat_timeouts(&mut self.state, &mut self.ctx, now);
        shutdown::handle_shutdown_timeouts(&mut self.state, &mut self.ctx, now);
        self.progress(now);
    }

    fn poll_timeout(&self) -> MocketTime {
        let state = &self.state;
        let mut deadlines = vec![
            self.ctx.keep_alive.deadline(),
            self.ctx.liveness.deadline(),
            self.ctx.cancelled_resend.deadline(),
            shutdown::shutdown_deadline(state),
        ];
        deadlines.extend(connect::connect_deadlines(state));
        deadlines.extend(suspend::suspend_deadlines(state));
        if let Some(tcb) = state.tcb().filter(|_| state.is_live()) {
            deadlines.extend(tcb.queues().iter().map(|q| q.lock().next_deadline()));
            deadlines.push(tcb.sack_deadline(self.ctx.options.sack_delay));
        }

        // Ensure that already expired timers don't return a time in the past.
        let now = self.now();
        timer::earliest(deadlines).map(|t| t.max(now)).unwrap_or(MocketTime::infinite_future())
    }

    fn connect(&mut self, local_addr: SocketAddr, remote: SocketAddr) {
        let now = self.now();
        connect::do_connect(&mut self.state, &mut self.ctx, now, local_addr, remote);
    }

    fn listen(&mut self, local_addr: SocketAddr) {
        connect::do_listen(&mut self.state, &mut self.ctx, local_addr);
    }

    fn send(&mut self, message: Message) -> SendStatus {
        let now = self.now();
        let status = data::send_message(&mut self.state, &mut self.ctx, now, message);
        match status {
            SendStatus::Success => {}
            SendStatus::ErrorResourceExhaustion => self.ctx.emit(MocketEvent::OnError(
                ErrorKind::ResourceExhaustion,
                "Unable to send message as the pending queue is full".into(),
            )),
            _ => info!("{}: Rejected message: {:?}", self.name, status),
        }
        status
    }

    fn cancel(&mut self, flow: Flow, tag: u16) -> usize {
        let now = self.now();
        let cancelled = data::cancel(&mut self.state, &mut self.ctx, now, flow, tag);
        self.progress(now);
        cancelled
    }

    fn suspend(&mut self, timeout: Duration) {
        let now = self.now();
        suspend::do_suspend(&mut self.state, &mut self.ctx, now, timeout);
        self.progress(now);
    }

    fn freeze(&self, freezer: &mut dyn Freezer) -> Result<(), ErrorKind> {
        suspend::do_freeze(&self.state, freezer)
    }

    fn resume(&mut self, local_addr: SocketAddr, timeout: Duration) {
        let now = self.now();
        suspend::do_resume(&mut self.state, &mut self.ctx, now, local_addr, timeout);
    }

    fn reestablish(&mut self, local_addr: SocketAddr, timeout: Duration) {
        let now = self.now();
        suspend::do_reestablish(&mut self.state, &mut self.ctx, now, local_addr, timeout);
    }

    fn shutdown(&mut self) {
        let now = self.now();
        shutdown::do_shutdown(&mut self.state, &mut self.ctx, now);
    }

    fn close(&mut self) {
        if !matches!(self.state, State::Closed) {
            if let (Some(to), Some(validation)) =
                (self.state.remote_addr(), self.state.peer_validation())
            {
                self.ctx.send_chunk(to, validation, Chunk::Abort(Default::default()));
            }
            self.ctx.internal_close(&mut self.state, None, String::new());
        }
    }

    fn state(&self) -> ConnectionState {
        match self.state {
            State::Closed => ConnectionState::Closed,
            State::Listening => ConnectionState::Listening,
            State::CookieWait(_) | State::CookieEchoed(_) | State::SimpleConnectSent(_) => {
                ConnectionState::Connecting
            }
            State::Established(_) => ConnectionState::Connected,
            State::SuspendPending(_) | State::SuspendSent(_) | State::SuspendAckPending(_) => {
                ConnectionState::Suspending
            }
            State::SuspendReceived(_) | State::Suspended(_) => ConnectionState::Suspended,
            State::ResumeSent(_) | State::ReEstablishSent(_) => ConnectionState::Resuming,
            State::ShutdownPending(_)
            | State::ShutdownSent(_)
            | State::ShutdownReceived(_)
            | State::ShutdownAckSent(_) => ConnectionState::ShuttingDown,
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.state.remote_addr()
    }

    fn options(&self) -> Options {
        self.ctx.options.clone()
    }

    fn get_metrics(&self) -> Option<Metrics> {
        let tcb = self.state.tcb()?;
        Some(Metrics {
            tx_packets_count: self.ctx.tx_packets_count,
            tx_messages_count: self.ctx.tx_messages_count,
            rtx_packets_count: self.ctx.rtx_packets_count,
            rx_packets_count: self.ctx.rx_packets_count,
            rx_messages_count: tcb.receive_queue.rx_messages_count(),
            rx_duplicate_packets_count: self.ctx.rx_duplicate_packets_count,
            srtt: tcb.rto.srtt(),
            unack_packets_count: tcb.unack_packets(),
            unack_bytes: tcb.unack_bytes(),
            peer_window_bytes: tcb.peer_window,
            min_ack_time: tcb.queues().iter().filter_map(|q| q.lock().min_ack_time()).min(),
        })
    }
}
