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
use crate::api::ErrorKind;
use crate::api::MocketEvent;
use crate::api::MocketTime;
use crate::api::Options;
use crate::api::crypto::CryptoProvider;
use crate::connection::state::State;
use crate::connection::transmission_control_block::TransmissionControlBlock;
use crate::packet::chunk::Chunk;
use crate::packet::header_only_chunks::AbortChunk;
use crate::packet::mocket_packet::PacketBuilder;
use crate::packet::mocket_packet::PacketHeader;
use crate::timer::Timer;
use crate::tx::pending_queue::PendingQueue;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

pub(crate) struct Context {
    pub name: String,
    pub options: Options,
    pub events: Rc<RefCell<dyn EventSink>>,
    pub crypto: Box<dyn CryptoProvider>,
    pub local_addr: Option<SocketAddr>,

    /// Keys the MAC of the state cookies issued while listening.
    pub cookie_secret: [u8; 16],

    /// Reliable messages waiting for the peer's window to open.
    pub pending: PendingQueue,

    /// Sends a heartbeat when nothing else has been sent for a while.
    pub keep_alive: Timer,

    /// Checks that something has been heard from the peer recently.
    pub liveness: Timer,

    pub cancelled_resend: Timer,

    pub rx_packets_count: usize,
    pub tx_packets_count: usize,
    pub tx_messages_count: usize,
    pub rtx_packets_count: usize,
    pub rx_duplicate_packets_count: usize,
}

impl Context {
    pub fn new(
        name: &str,
        options: &Options,
        events: Rc<RefCell<dyn EventSink>>,
        crypto: Box<dyn CryptoProvider>,
    ) -> Self {
        let liveness_interval = options.keep_alive_interval * 2;
        Self {
            name: name.to_string(),
            options: options.clone(),
            events,
            crypto,
            local_addr: None,
            cookie_secret: [0; 16],
            pending: PendingQueue::new(options.pending_queue_size),
            keep_alive: Timer::periodic(options.keep_alive_interval),
            liveness: Timer::periodic(liveness_interval),
            cancelled_resend: Timer::periodic(options.cancelled_tsn_interval),
            rx_packets_count: 0,
            tx_packets_count: 0,
            tx_messages_count: 0,
            rtx_packets_count: 0,
            rx_duplicate_packets_count: 0,
        }
    }

    pub fn emit(&self, event: MocketEvent) {
        self.events.borrow_mut().add(event);
    }

    pub fn send_packet(&mut self, to: SocketAddr, packet: Vec<u8>) {
        self.emit(MocketEvent::SendPacket(to, packet));
        self.tx_packets_count += 1;
    }

    /// Creates a builder for a packet sent before the connection is established.
    pub fn new_handshake_packet(&self, validation: u32) -> PacketBuilder {
        PacketBuilder::new(
            PacketHeader::new(validation, self.options.max_window_size),
            self.options.mtu,
        )
    }

    /// Sends a packet with a single state change chunk.
    pub fn send_chunk(&mut self, to: SocketAddr, validation: u32, chunk: Chunk) {
        let mut builder = self.new_handshake_packet(validation);
        if builder.add(&chunk).is_ok() {
            let packet = builder.build();
            self.send_packet(to, packet);
        }
    }

    /// Sends a packet with a single state change chunk to the peer of an established
    /// connection.
    pub fn send_to_peer(&mut self, tcb: &TransmissionControlBlock, chunk: Chunk) {
        let mut builder = tcb.new_control_packet();
        if builder.add(&chunk).is_ok() {
            let packet = builder.build();
            self.send_packet(tcb.remote_addr, packet);
        }
    }

    /// Starts the timers that run while the connection is established.
    pub fn start_live_timers(&mut self, now: MocketTime) {
        self.keep_alive.start(now);
        self.liveness.start(now);
        self.cancelled_resend.start(now);
    }

    pub fn stop_live_timers(&mut self) {
        self.keep_alive.stop();
        self.liveness.stop();
        self.cancelled_resend.stop();
    }

    /// Closes the connection without telling the peer. `error` of `None` is a regular close.
    pub fn internal_close(&mut self, state: &mut State, error: Option<ErrorKind>, message: String) {
        if matches!(state, State::Closed) {
            return;
        }
        self.stop_live_timers();
        self.pending.clear();
        let event = match error {
            None => MocketEvent::OnClosed(),
            Some(kind) if state.is_connecting() => MocketEvent::OnConnectionFailed(kind, message),
            Some(kind) => MocketEvent::OnAborted(kind, message),
        };
        self.emit(event);
        *state = State::Closed;
    }

    /// Sends ABORT to the peer, if it's known, and closes the connection.
    pub fn abort(&mut self, state: &mut State, error: ErrorKind, message: String) {
        if let (Some(to), Some(validation)) = (state.remote_addr(), state.peer_validation()) {
            self.send_chunk(to, validation, Chunk::Abort(AbortChunk::default()));
        }
        self.internal_close(state, Some(error), message);
    }
}
