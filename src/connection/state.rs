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

use crate::api::crypto::KeyPair;
use crate::connection::transmission_control_block::TransmissionControlBlock;
use crate::packet::cookie_echo_chunk::CookieEchoChunk;
use crate::packet::init_chunk::InitParams;
use crate::timer::Timer;
use std::net::SocketAddr;

/// The initiator side of a handshake, before the peer has answered.
pub(crate) struct ConnectingState {
    pub remote_addr: SocketAddr,
    pub local: InitParams,
    pub retry: Timer,
    pub deadline: Timer,
}

pub(crate) struct CookieEchoedState {
    pub remote_addr: SocketAddr,
    pub local: InitParams,
    pub peer: InitParams,
    pub cookie_echo: CookieEchoChunk,
    pub key_pair: Option<KeyPair>,
    pub retry: Timer,
    pub deadline: Timer,
}

/// A locally requested suspension, first flushing outstanding data and then waiting for the
/// peer's acknowledgement.
pub(crate) struct SuspendingState {
    pub tcb: TransmissionControlBlock,
    pub key_pair: Option<KeyPair>,
    pub retry: Timer,
    pub deadline: Timer,
}

/// A suspension requested by the peer, acknowledged once outstanding data has been flushed.
pub(crate) struct PeerSuspendingState {
    pub tcb: TransmissionControlBlock,
    /// The peer's public key, or `None` if the secret was already exchanged.
    pub public_key: Option<Vec<u8>>,
    pub deadline: Timer,
}

/// Waiting for RESUME-ACK or RE-ESTABLISH-ACK.
pub(crate) struct ResumingState {
    pub tcb: TransmissionControlBlock,
    pub encrypted_nonce: Vec<u8>,
    pub retry: Timer,
    pub deadline: Timer,
}

pub(crate) struct FlushingState {
    pub tcb: TransmissionControlBlock,
    pub deadline: Timer,
}

pub(crate) struct ShutdownState {
    pub tcb: TransmissionControlBlock,
    pub retry: Timer,
}

pub(crate) enum State {
    Closed,
    Listening,
    CookieWait(ConnectingState),
    CookieEchoed(CookieEchoedState),
    SimpleConnectSent(ConnectingState),
    Established(TransmissionControlBlock),
    SuspendPending(SuspendingState),
    SuspendSent(SuspendingState),
    SuspendAckPending(PeerSuspendingState),
    SuspendReceived(TransmissionControlBlock),
    Suspended(TransmissionControlBlock),
    ResumeSent(ResumingState),
    ReEstablishSent(ResumingState),
    ShutdownPending(FlushingState),
    ShutdownSent(ShutdownState),
    ShutdownReceived(FlushingState),
    ShutdownAckSent(ShutdownState),
}

impl State {
    pub fn tcb_mut(&mut self) -> Option<&mut TransmissionControlBlock> {
        match self {
            State::Established(tcb)
            | State::SuspendReceived(tcb)
            | State::Suspended(tcb)
            | State::SuspendPending(SuspendingState { tcb, .. })
            | State::SuspendSent(SuspendingState { tcb, .. })
            | State::SuspendAckPending(PeerSuspendingState { tcb, .. })
            | State::ResumeSent(ResumingState { tcb, .. })
            | State::ReEstablishSent(ResumingState { tcb, .. })
            | State::ShutdownPending(FlushingState { tcb, .. })
            | State::ShutdownReceived(FlushingState { tcb, .. })
            | State::ShutdownSent(ShutdownState { tcb, .. })
            | State::ShutdownAckSent(ShutdownState { tcb, .. }) => Some(tcb),
            _ => None,
        }
    }

    pub fn tcb(&self) -> Option<&TransmissionControlBlock> {
        match self {
            State::Established(tcb)
            | State::SuspendReceived(tcb)
            | State::Suspended(tcb)
            | State::SuspendPending(SuspendingState { tcb, .. })
            | State::SuspendSent(SuspendingState { tcb, .. })
            | State::SuspendAckPending(PeerSuspendingState { tcb, .. })
            | State::ResumeSent(ResumingState { tcb, .. })
            | State::ReEstablishSent(ResumingState { tcb, .. })
            | State::ShutdownPending(FlushingState { tcb, .. })
            | State::ShutdownReceived(FlushingState { tcb, .. })
            | State::ShutdownSent(ShutdownState { tcb, .. })
            | State::ShutdownAckSent(ShutdownState { tcb, .. }) => Some(tcb),
            _ => None,
        }
    }

    /// The TCB, in the states where data is exchanged with the peer.
    pub fn live_tcb_mut(&mut self) -> Option<&mut TransmissionControlBlock> {
        if self.is_live() { self.tcb_mut() } else { None }
    }

    /// Whether data and acknowledgements flow in this state.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            State::Established(_)
                | State::SuspendPending(_)
                | State::SuspendSent(_)
                | State::SuspendAckPending(_)
                | State::ShutdownPending(_)
                | State::ShutdownSent(_)
                | State::ShutdownReceived(_)
                | State::ShutdownAckSent(_)
        )
    }

    /// Whether this side has started a handshake that hasn't completed yet.
    pub fn is_connecting(&self) -> bool {
        matches!(self, State::CookieWait(_) | State::CookieEchoed(_) | State::SimpleConnectSent(_))
    }

    /// Where packets are sent, in any state but `Closed` and `Listening`.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match self {
            State::CookieWait(s) | State::SimpleConnectSent(s) => Some(s.remote_addr),
            State::CookieEchoed(s) => Some(s.remote_addr),
            _ => self.tcb().map(|tcb| tcb.remote_addr),
        }
    }

    /// The validation to put in packets sent to the peer, if it's known.
    pub fn peer_validation(&self) -> Option<u32> {
        match self {
            State::CookieEchoed(s) => Some(s.peer.validation),
            _ => self.tcb().map(|tcb| tcb.peer.validation),
        }
    }
}

/// Facilitates state transitions within a `State` enum, allowing the state enum variant arguments
/// to be moved to the new state.
#[macro_export]
macro_rules! transition_between {
  ($state:expr, $($from_pat:pat),+ => $to_expr:expr) => {
      $state = match std::mem::replace(&mut $state, State::Closed) {
          $($from_pat => $to_expr,)+
          _ => unreachable!(),
      };
  };
}
