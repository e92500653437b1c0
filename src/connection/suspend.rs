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

use crate::api::ErrorKind;
use crate::api::MocketEvent;
use crate::api::MocketTime;
use crate::api::crypto::CryptoError;
use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use crate::connection::context::Context;
use crate::connection::state::PeerSuspendingState;
use crate::connection::state::ResumingState;
use crate::connection::state::State;
use crate::connection::state::SuspendingState;
use crate::connection::transmission_control_block::TransmissionControlBlock;
use crate::packet::chunk::Chunk;
use crate::packet::header_only_chunks::ReEstablishAckChunk;
use crate::packet::header_only_chunks::ResumeAckChunk;
use crate::packet::header_only_chunks::SimpleSuspendAckChunk;
use crate::packet::header_only_chunks::SimpleSuspendChunk;
use crate::packet::mocket_packet::MocketPacket;
use crate::packet::mocket_packet::PacketHeader;
use crate::packet::opaque_chunks::ReEstablishChunk;
use crate::packet::opaque_chunks::ResumeChunk;
use crate::packet::opaque_chunks::SuspendAckChunk;
use crate::packet::opaque_chunks::SuspendChunk;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::timer::Timer;
use crate::transition_between;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::cmp::Ordering;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::time::Duration;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

/// The secret shared by both sides of a connection, which proves the identity of whoever
/// resumes or re-establishes it.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSecret {
    pub uuid: u32,
    pub password: Vec<u8>,
}

impl SessionSecret {
    /// Creates a secret with a random alphanumeric password of `password_length` characters.
    pub fn generate(password_length: usize) -> Self {
        let mut rng = rand::rng();
        let password = (&mut rng).sample_iter(Alphanumeric).take(password_length).collect();
        Self { uuid: rng.random(), password }
    }

    /// The encoding that is encrypted with the peer's public key: the password length as u16,
    /// the password and the uuid as u32.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0; 2 + self.password.len() + 4];
        write_u16_be!(&mut data, self.password.len());
        data[2..2 + self.password.len()].copy_from_slice(&self.password);
        write_u32_be!(&mut data[2 + self.password.len()..], self.uuid);
        data
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        let len = read_u16_be!(data) as usize;
        if len == 0 || data.len() != 2 + len + 4 {
            return None;
        }
        Some(Self { password: data[2..2 + len].to_vec(), uuid: read_u32_be!(&data[2 + len..]) })
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        freezer.put_u32(self.uuid);
        freezer.put_bytes(&self.password);
    }

    pub fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        let uuid = defroster.get_u32()?;
        let password = defroster.get_bytes()?;
        Ok(Self { uuid, password })
    }
}

const NONCE_SIZE: usize = 10;

/// The proof sent in RESUME and REESTABLISH, encrypted with the key derived from the
/// session password. It binds the session's uuid to the address it's sent from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResumeNonce {
    pub uuid: u32,
    /// Unspecified when the local address is IPv6.
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl ResumeNonce {
    pub fn new(uuid: u32, local_addr: SocketAddr) -> Self {
        let ip = match local_addr.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        Self { uuid, ip, port: local_addr.port() }
    }

    pub fn to_bytes(&self) -> [u8; NONCE_SIZE] {
        let mut data = [0; NONCE_SIZE];
        write_u32_be!(&mut data, self.uuid);
        data[4..8].copy_from_slice(&self.ip.octets());
        write_u16_be!(&mut data[8..], self.port);
        data
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != NONCE_SIZE {
            return None;
        }
        let octets: [u8; 4] = data[4..8].try_into().ok()?;
        Some(Self {
            uuid: read_u32_be!(data),
            ip: Ipv4Addr::from(octets),
            port: read_u16_be!(&data[8..]),
        })
    }
}

fn wrong_state(ctx: &Context, state: &State, what: &str) {
    let kind = if matches!(state, State::Closed | State::Listening) {
        ErrorKind::NotConnected
    } else {
        ErrorKind::WrongState
    };
    ctx.emit(MocketEvent::OnError(kind, format!("Can't {what} in the current state")));
}

/// Applies the minimum floor to a suspend or resume timeout.
fn bounded_timeout(ctx: &Context, timeout: Duration) -> Duration {
    timeout.max(ctx.options.min_suspend_resume_timeout)
}

/// Starts suspending an established connection. SUSPEND is sent once all reliable data has
/// been acknowledged.
pub(crate) fn do_suspend(state: &mut State, ctx: &mut Context, now: MocketTime, timeout: Duration) {
    let Some(tcb) = state.tcb() else {
        return wrong_state(ctx, state, "suspend");
    };
    if !matches!(state, State::Established(_)) {
        return wrong_state(ctx, state, "suspend");
    }
    let key_pair = if tcb.secret.is_some() {
        None
    } else {
        match ctx.crypto.generate_key_pair() {
            Ok(key_pair) => Some(key_pair),
            Err(e) => {
                ctx.emit(MocketEvent::OnError(
                    ErrorKind::CryptoFailed,
                    format!("Failed to generate a key pair: {e}"),
                ));
                return;
            }
        }
    };
    let mut deadline = Timer::once(bounded_timeout(ctx, timeout));
    deadline.start(now);
    let retry = Timer::periodic(ctx.options.suspend_resume_retry_interval);

    info!("{}: Suspending", ctx.name);
    transition_between!(*state,
        State::Established(tcb) => {
            State::SuspendPending(SuspendingState { tcb, key_pair, retry, deadline })
        }
    );
}

fn suspend_chunk(s: &SuspendingState) -> Chunk {
    match &s.key_pair {
        Some(key_pair) => Chunk::Suspend(SuspendChunk { key_data: key_pair.public_key.clone() }),
        None => Chunk::SimpleSuspend(SimpleSuspendChunk {}),
    }
}

fn send_suspend_ack(
    tcb: &TransmissionControlBlock,
    ctx: &mut Context,
    public_key: Option<&[u8]>,
) -> Result<(), CryptoError> {
    let chunk = match public_key {
        Some(public_key) => {
            let secret = tcb.secret.as_ref().ok_or(CryptoError::InvalidKey)?;
            let encrypted_secret =
                ctx.crypto.encrypt_with_public_key(public_key, &secret.to_bytes())?;
            Chunk::SuspendAck(SuspendAckChunk { encrypted_secret })
        }
        None => Chunk::SimpleSuspendAck(SimpleSuspendAckChunk {}),
    };
    ctx.send_to_peer(tcb, chunk);
    Ok(())
}

/// Handles SUSPEND (with `public_key` unless empty) and SIMPLE-SUSPEND from the peer.
pub(crate) fn handle_suspend(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    public_key: Option<Vec<u8>>,
) {
    let public_key = public_key.filter(|k| !k.is_empty());
    match state {
        State::Established(_) => enter_peer_suspend(state, ctx, now, public_key),
        State::SuspendPending(s) | State::SuspendSent(s) => {
            let local = ctx.local_addr.unwrap_or(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
            let mine = (s.tcb.local.validation, local.ip(), local.port());
            let remote = s.tcb.remote_addr;
            let theirs = (s.tcb.peer.validation, remote.ip(), remote.port());
            if mine.cmp(&theirs) != Ordering::Less {
                info!("{}: Both sides suspend, waiting for the peer to yield", ctx.name);
                return;
            }
            info!("{}: Both sides suspend, yielding to the peer", ctx.name);
            ctx.emit(MocketEvent::OnError(
                ErrorKind::WrongState,
                "Suspension superseded by the peer's".into(),
            ));
            transition_between!(*state,
                State::SuspendPending(s) | State::SuspendSent(s) => State::Established(s.tcb)
            );
            enter_peer_suspend(state, ctx, now, public_key);
        }
        State::SuspendReceived(tcb) => {
            // The acknowledgement was lost.
            if let Err(e) = send_suspend_ack(tcb, ctx, public_key.as_deref()) {
                warn!("{}: Can't acknowledge SUSPEND: {}", ctx.name, e);
            }
        }
        _ => info!("{}: Ignoring SUSPEND", ctx.name),
    }
}

fn enter_peer_suspend(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    public_key: Option<Vec<u8>>,
) {
    let mut deadline = Timer::once(bounded_timeout(ctx, ctx.options.suspend_timeout));
    deadline.start(now);
    let password_length = ctx.options.password_length;
    info!("{}: Peer requests suspension", ctx.name);
    transition_between!(*state,
        State::Established(mut tcb) => {
            if public_key.is_some() {
                tcb.secret = Some(SessionSecret::generate(password_length));
            }
            State::SuspendAckPending(PeerSuspendingState { tcb, public_key, deadline })
        }
    );
}

/// Acknowledges the peer's suspension, when the own reliable data has been flushed or the
/// flush has timed out.
fn complete_peer_suspend(state: &mut State, ctx: &mut Context) {
    let State::SuspendAckPending(s) = state else { return };
    if let Err(e) = send_suspend_ack(&s.tcb, ctx, s.public_key.as_deref()) {
        let message = format!("Failed to encrypt the session secret: {e}");
        warn!("{}: {}", ctx.name, message);
        ctx.abort(state, ErrorKind::CryptoFailed, message);
        return;
    }
    transition_between!(*state, State::SuspendAckPending(s) => State::SuspendReceived(s.tcb));
    ctx.keep_alive.stop();
    ctx.cancelled_resend.stop();
    ctx.emit(MocketEvent::OnSuspended());
}

/// Handles SUSPEND-ACK (with the encrypted secret) and SIMPLE-SUSPEND-ACK.
pub(crate) fn handle_suspend_ack(
    state: &mut State,
    ctx: &mut Context,
    encrypted_secret: Option<Vec<u8>>,
) {
    let State::SuspendSent(s) = state else {
        info!("{}: Ignoring unexpected suspend acknowledgement", ctx.name);
        return;
    };
    if let (Some(encrypted), Some(key_pair)) = (&encrypted_secret, &s.key_pair) {
        match ctx
            .crypto
            .decrypt_with_private_key(key_pair, encrypted)
            .ok()
            .and_then(|plain| SessionSecret::from_bytes(&plain))
        {
            Some(secret) => s.tcb.secret = Some(secret),
            None => {
                let message = "Failed to decrypt the session secret".to_string();
                warn!("{}: {}", ctx.name, message);
                ctx.abort(state, ErrorKind::CryptoFailed, message);
                return;
            }
        }
    }
    transition_between!(*state, State::SuspendSent(s) => State::Suspended(s.tcb));
    ctx.stop_live_timers();
    info!("{}: Suspended", ctx.name);
    ctx.emit(MocketEvent::OnSuspended());
}

/// Sends SUSPEND or the suspend acknowledgement once the reliable data has been flushed.
pub(crate) fn progress_suspend(state: &mut State, ctx: &mut Context, now: MocketTime) {
    let flushed = ctx.pending.is_empty() && state.tcb().is_some_and(|tcb| tcb.is_flushed());
    if !flushed {
        return;
    }
    match state {
        State::SuspendPending(s) => {
            let chunk = suspend_chunk(s);
            ctx.send_to_peer(&s.tcb, chunk);
            s.retry.start(now);
            transition_between!(*state, State::SuspendPending(s) => State::SuspendSent(s));
        }
        State::SuspendAckPending(_) => complete_peer_suspend(state, ctx),
        _ => {}
    }
}

pub(crate) fn do_freeze(state: &State, freezer: &mut dyn Freezer) -> Result<(), ErrorKind> {
    match state {
        State::Suspended(tcb) => {
            tcb.freeze(freezer);
            Ok(())
        }
        _ => Err(ErrorKind::WrongState),
    }
}

fn encrypt_nonce(
    tcb: &TransmissionControlBlock,
    ctx: &Context,
    local_addr: SocketAddr,
) -> Result<Vec<u8>, CryptoError> {
    let secret = tcb.secret.as_ref().ok_or(CryptoError::InvalidKey)?;
    let key = ctx.crypto.derive_secret_key(&secret.password)?;
    ctx.crypto.encrypt(&key, &ResumeNonce::new(secret.uuid, local_addr).to_bytes())
}

/// Resumes a suspended connection from `local_addr`, which may differ from the address the
/// connection was established from.
pub(crate) fn do_resume(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    local_addr: SocketAddr,
    timeout: Duration,
) {
    start_resume(state, ctx, now, local_addr, timeout, false);
}

/// Re-attaches to an established connection from `local_addr`, after connectivity was lost
/// without a suspension.
pub(crate) fn do_reestablish(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    local_addr: SocketAddr,
    timeout: Duration,
) {
    start_resume(state, ctx, now, local_addr, timeout, true);
}

fn start_resume(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    local_addr: SocketAddr,
    timeout: Duration,
    reestablish: bool,
) {
    let allowed = if reestablish {
        matches!(state, State::Established(_))
    } else {
        matches!(state, State::Suspended(_))
    };
    if !allowed {
        return wrong_state(ctx, state, if reestablish { "re-establish" } else { "resume" });
    }
    let Some(tcb) = state.tcb() else { return };
    let encrypted_nonce = match encrypt_nonce(tcb, ctx, local_addr) {
        Ok(nonce) => nonce,
        Err(e) => {
            ctx.emit(MocketEvent::OnError(
                ErrorKind::CryptoFailed,
                format!("Can't prove the session's identity: {e}"),
            ));
            return;
        }
    };
    ctx.local_addr = Some(local_addr);
    let chunk = resume_chunk(reestablish, &encrypted_nonce);
    ctx.send_to_peer(tcb, chunk);

    let mut retry = Timer::periodic(ctx.options.suspend_resume_retry_interval);
    retry.start(now);
    let mut deadline = Timer::once(bounded_timeout(ctx, timeout));
    deadline.start(now);
    ctx.stop_live_timers();
    info!("{}: Sending {} from {}", ctx.name, chunk_name(reestablish), local_addr);
    if reestablish {
        transition_between!(*state,
            State::Established(tcb) => {
                State::ReEstablishSent(ResumingState { tcb, encrypted_nonce, retry, deadline })
            }
        );
    } else {
        transition_between!(*state,
            State::Suspended(tcb) => {
                State::ResumeSent(ResumingState { tcb, encrypted_nonce, retry, deadline })
            }
        );
    }
}

fn chunk_name(reestablish: bool) -> &'static str {
    if reestablish { "REESTABLISH" } else { "RESUME" }
}

fn resume_chunk(reestablish: bool, encrypted_nonce: &[u8]) -> Chunk {
    let encrypted_nonce = encrypted_nonce.to_vec();
    if reestablish {
        Chunk::ReEstablish(ReEstablishChunk { encrypted_nonce })
    } else {
        Chunk::Resume(ResumeChunk { encrypted_nonce })
    }
}

/// Checks that the nonce in RESUME or REESTABLISH proves knowledge of the session secret,
/// and that it was sent from the port it claims.
fn verify_nonce(
    tcb: &TransmissionControlBlock,
    ctx: &Context,
    from: SocketAddr,
    encrypted_nonce: &[u8],
) -> Result<(), String> {
    let secret = tcb.secret.as_ref().ok_or("no session secret")?;
    let key = ctx.crypto.derive_secret_key(&secret.password).map_err(|e| e.to_string())?;
    let plain = ctx.crypto.decrypt(&key, encrypted_nonce).map_err(|e| e.to_string())?;
    let nonce = ResumeNonce::from_bytes(&plain).ok_or("malformed nonce")?;
    if nonce.uuid != secret.uuid {
        return Err("wrong session".into());
    }
    if nonce.port != from.port() {
        return Err(format!("nonce port {} doesn't match {}", nonce.port, from.port()));
    }
    Ok(())
}

/// Handles RESUME or REESTABLISH, which may arrive from an address that is not yet known.
pub(crate) fn handle_resume(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    header: &PacketHeader,
    chunk: Chunk,
) {
    let (encrypted_nonce, reestablish) = match &chunk {
        Chunk::Resume(c) => (&c.encrypted_nonce, false),
        Chunk::ReEstablish(c) => (&c.encrypted_nonce, true),
        _ => return,
    };
    let Some(tcb) = state.tcb() else { return };
    let expected = match state {
        State::SuspendReceived(_) => !reestablish,
        State::Established(_) => true,
        _ => false,
    };
    if !expected {
        info!("{}: Ignoring {}", ctx.name, chunk);
        return;
    }
    if header.validation != tcb.local.validation {
        warn!("{}: Dropping {} with wrong validation", ctx.name, chunk);
        return;
    }
    if let Err(e) = verify_nonce(tcb, ctx, from, encrypted_nonce) {
        warn!("{}: Dropping {} from {}: {}", ctx.name, chunk, from, e);
        return;
    }

    let resumed = matches!(state, State::SuspendReceived(_)) || tcb.remote_addr != from;
    if let Some(tcb) = state.tcb_mut() {
        if tcb.remote_addr != from {
            info!("{}: Peer moved from {} to {}", ctx.name, tcb.remote_addr, from);
        }
        tcb.remote_addr = from;
        tcb.last_received = now;
        tcb.peer_unreachable = false;
        tcb.peer_window = header.window_size;
        let ack = if reestablish {
            Chunk::ReEstablishAck(ReEstablishAckChunk {})
        } else {
            Chunk::ResumeAck(ResumeAckChunk {})
        };
        ctx.send_to_peer(tcb, ack);
    }
    if matches!(state, State::SuspendReceived(_)) {
        transition_between!(*state, State::SuspendReceived(tcb) => State::Established(tcb));
        ctx.start_live_timers(now);
    }
    if resumed {
        ctx.emit(MocketEvent::OnResumed());
    }
}

/// Handles a packet while waiting for RESUME-ACK or REESTABLISH-ACK. Data is discarded
/// until the peer has accepted the new address.
pub(crate) fn handle_resuming_packet(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    packet: MocketPacket,
) {
    let Some(tcb) = state.tcb() else { return };
    let (local_validation, remote_addr) = (tcb.local.validation, tcb.remote_addr);
    let header = packet.header;
    for chunk in packet.chunks.into_iter().filter(Chunk::is_state_change) {
        if header.validation != local_validation || from != remote_addr {
            if let Chunk::Abort(_) = chunk {
                info!("{}: Ignoring ABORT from {}", ctx.name, from);
                continue;
            }
            let message = format!("Received {chunk} from {from} with unexpected identity");
            warn!("{}: {}", ctx.name, message);
            ctx.abort(state, ErrorKind::ProtocolViolation, message);
            return;
        }
        match chunk {
            Chunk::Abort(_) => {
                ctx.internal_close(state, Some(ErrorKind::PeerReported), "Aborted by peer".into());
                return;
            }
            Chunk::ResumeAck(_) if matches!(state, State::ResumeSent(_)) => {
                return complete_resume(state, ctx, now, header.window_size);
            }
            Chunk::ReEstablishAck(_) if matches!(state, State::ReEstablishSent(_)) => {
                return complete_resume(state, ctx, now, header.window_size);
            }
            Chunk::SuspendAck(_) | Chunk::SimpleSuspendAck(_) => {
                info!("{}: Ignoring late {}", ctx.name, chunk);
            }
            chunk => {
                let message = format!("Unexpected {chunk} while resuming");
                warn!("{}: {}", ctx.name, message);
                ctx.abort(state, ErrorKind::ProtocolViolation, message);
                return;
            }
        }
    }
}

fn complete_resume(state: &mut State, ctx: &mut Context, now: MocketTime, window: u32) {
    transition_between!(*state,
        State::ResumeSent(s) | State::ReEstablishSent(s) => State::Established(s.tcb)
    );
    if let State::Established(tcb) = state {
        tcb.last_received = now;
        tcb.peer_unreachable = false;
        tcb.peer_window = window;
        let rto = tcb.rto.rto();
        for queue in tcb.queues() {
            queue.lock().reset_retransmit_timeouts(rto);
        }
    }
    ctx.start_live_timers(now);
    info!("{}: Resumed", ctx.name);
    ctx.emit(MocketEvent::OnResumed());
}

/// Handles a packet while the peer has suspended the connection. Only the packets that can
/// end the suspension, or a retransmitted SUSPEND, matter.
pub(crate) fn handle_suspend_received_packet(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    packet: MocketPacket,
) {
    let Some(tcb) = state.tcb_mut() else { return };
    let from_peer = packet.header.validation == tcb.local.validation && from == tcb.remote_addr;
    if from_peer {
        tcb.last_received = now;
    }
    let header = packet.header;
    for chunk in packet.chunks.into_iter().filter(Chunk::is_state_change) {
        match chunk {
            Chunk::Resume(_) => return handle_resume(state, ctx, now, from, &header, chunk),
            Chunk::Abort(_) if from_peer => {
                ctx.internal_close(state, Some(ErrorKind::PeerReported), "Aborted by peer".into());
                return;
            }
            Chunk::Suspend(c) if from_peer => handle_suspend(state, ctx, now, Some(c.key_data)),
            Chunk::SimpleSuspend(_) if from_peer => handle_suspend(state, ctx, now, None),
            chunk => info!("{}: Ignoring {} while suspended", ctx.name, chunk),
        }
    }
}

/// Handles a packet in the suspended state. Only ABORT is of interest.
pub(crate) fn handle_suspended_packet(
    state: &mut State,
    ctx: &mut Context,
    from: SocketAddr,
    packet: MocketPacket,
) {
    let Some(tcb) = state.tcb() else { return };
    if packet.header.validation != tcb.local.validation || from != tcb.remote_addr {
        return;
    }
    if packet.chunks.iter().any(|c| matches!(c, Chunk::Abort(_))) {
        ctx.internal_close(state, Some(ErrorKind::PeerReported), "Aborted by peer".into());
    }
}

/// Retransmits SUSPEND, RESUME and REESTABLISH, and gives up at their deadlines.
pub(crate) fn handle_suspend_timeouts(state: &mut State, ctx: &mut Context, now: MocketTime) {
    let reestablish = matches!(state, State::ReEstablishSent(_));
    let timed_out = match state {
        State::SuspendPending(s) => s.deadline.fire(now).then_some("Suspend timed out"),
        State::SuspendSent(s) => {
            if s.deadline.fire(now) {
                Some("Suspend timed out")
            } else {
                if s.retry.fire(now) {
                    let chunk = suspend_chunk(s);
                    ctx.send_to_peer(&s.tcb, chunk);
                }
                None
            }
        }
        State::SuspendAckPending(s) => {
            if s.deadline.fire(now) {
                info!("{}: Flush timed out, acknowledging suspension", ctx.name);
                complete_peer_suspend(state, ctx);
            }
            None
        }
        State::ResumeSent(s) | State::ReEstablishSent(s) => {
            if s.deadline.fire(now) {
                Some("Resume timed out")
            } else {
                if s.retry.fire(now) {
                    let chunk = resume_chunk(reestablish, &s.encrypted_nonce);
                    ctx.send_to_peer(&s.tcb, chunk);
                }
                None
            }
        }
        _ => None,
    };
    if let Some(message) = timed_out {
        ctx.abort(state, ErrorKind::Timeout, message.into());
    }
}

pub(crate) fn suspend_deadlines(state: &State) -> [Option<MocketTime>; 2] {
    match state {
        State::SuspendPending(s) | State::SuspendSent(s) => {
            [s.retry.deadline(), s.deadline.deadline()]
        }
        State::SuspendAckPending(s) => [s.deadline.deadline(), None],
        State::ResumeSent(s) | State::ReEstablishSent(s) => {
            [s.retry.deadline(), s.deadline.deadline()]
        }
        _ => [None, None],
    }
}
