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
use crate::connection::context::Context;
use crate::connection::state::ConnectingState;
use crate::connection::state::CookieEchoedState;
use crate::connection::state::State;
use crate::connection::state_cookie::StateCookie;
use crate::connection::suspend::SessionSecret;
use crate::connection::transmission_control_block::TransmissionControlBlock;
use crate::packet::chunk::Chunk;
use crate::packet::cookie_ack_chunk::CookieAckChunk;
use crate::packet::cookie_echo_chunk::CookieEchoChunk;
use crate::packet::init_chunk::InitAckChunk;
use crate::packet::init_chunk::InitChunk;
use crate::packet::init_chunk::InitParams;
use crate::packet::mocket_packet::MocketPacket;
use crate::packet::mocket_packet::PacketHeader;
use crate::packet::simple_connect_chunk::SimpleConnectAckChunk;
use crate::packet::simple_connect_chunk::SimpleConnectChunk;
use crate::timer::Timer;
use crate::transition_between;
use crate::types::Tsn;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
use rand::Rng;
use std::net::SocketAddr;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

const MIN_VALIDATION: u32 = 1;
const MAX_VALIDATION: u32 = i32::MAX as u32;

/// Picks a new validation and initial sequence numbers for all flows.
pub(crate) fn random_init_params() -> InitParams {
    let mut rng = rand::rng();
    InitParams {
        validation: rng.random_range(MIN_VALIDATION..=MAX_VALIDATION),
        control_tsn: Tsn(rng.random()),
        rel_seq_tsn: Tsn(rng.random()),
        unrel_seq_tsn: Tsn(rng.random()),
        rel_unseq_id: Tsn(rng.random()),
        unrel_unseq_id: Tsn(rng.random()),
    }
}

pub(crate) fn do_listen(state: &mut State, ctx: &mut Context, local_addr: SocketAddr) {
    if !matches!(state, State::Closed) {
        ctx.emit(MocketEvent::OnError(
            ErrorKind::WrongState,
            "Can only listen on a closed connection".into(),
        ));
        return;
    }
    ctx.local_addr = Some(local_addr);
    rand::rng().fill(&mut ctx.cookie_secret);
    *state = State::Listening;
}

pub(crate) fn do_connect(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
) {
    if !matches!(state, State::Closed) {
        ctx.emit(MocketEvent::OnError(
            ErrorKind::WrongState,
            "Can only connect from a closed connection".into(),
        ));
        return;
    }
    ctx.local_addr = Some(local_addr);
    let local = random_init_params();
    let mut retry = Timer::periodic(ctx.options.connect_retry_interval);
    retry.start(now);
    let mut deadline = Timer::once(ctx.options.connect_timeout);
    deadline.start(now);

    let connecting = ConnectingState { remote_addr, local, retry, deadline };
    if ctx.options.simple_connect {
        ctx.send_chunk(remote_addr, 0, Chunk::SimpleConnect(SimpleConnectChunk { params: local }));
        *state = State::SimpleConnectSent(connecting);
    } else {
        ctx.send_chunk(remote_addr, 0, Chunk::Init(InitChunk { params: local }));
        *state = State::CookieWait(connecting);
    }
}

/// Handles a packet while listening. Only the chunks that open a connection are of interest,
/// everything else is silently discarded.
pub(crate) fn handle_listening_packet(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    packet: MocketPacket,
) {
    let header = packet.header;
    for chunk in packet.chunks {
        match chunk {
            Chunk::Init(c) => handle_init(ctx, now, from, &header, c),
            Chunk::CookieEcho(c) => handle_cookie_echo(state, ctx, now, from, &header, c),
            Chunk::SimpleConnect(c) => handle_simple_connect(state, ctx, now, from, &header, c),
            other => info!("{}: Ignoring {} while listening", ctx.name, other),
        }
        if !matches!(state, State::Listening) {
            return;
        }
    }
}

/// Answers INIT with INIT-ACK, without keeping any state. Everything needed to create the
/// connection later goes into the cookie.
fn handle_init(
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    header: &PacketHeader,
    chunk: InitChunk,
) {
    if header.validation != 0 {
        warn!("{}: Dropping INIT with non-zero validation", ctx.name);
        return;
    }
    let local_port = ctx.local_addr.map_or(0, |a| a.port());
    let responder = random_init_params();
    let state_cookie = StateCookie::new(
        now,
        ctx.options.cookie_lifespan,
        chunk.params,
        responder,
        from.port(),
        local_port,
    )
    .serialize(&ctx.cookie_secret);
    ctx.send_chunk(
        from,
        chunk.params.validation,
        Chunk::InitAck(InitAckChunk { params: responder, state_cookie }),
    );
}

fn handle_cookie_echo(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    header: &PacketHeader,
    chunk: CookieEchoChunk,
) {
    let cookie = match StateCookie::verify(&chunk.cookie, &ctx.cookie_secret, now) {
        Ok(cookie) => cookie,
        Err(e) => {
            warn!("{}: Dropping COOKIE-ECHO from {}: {}", ctx.name, from, e);
            return;
        }
    };
    if header.validation != cookie.responder.validation || cookie.initiator_port != from.port() {
        warn!("{}: Dropping COOKIE-ECHO from {} that doesn't match its cookie", ctx.name, from);
        return;
    }

    let mut tcb =
        TransmissionControlBlock::new(&ctx.options, cookie.responder, cookie.initiator, from, now);
    let encrypted_secret = if chunk.public_key.is_empty() {
        None
    } else {
        let secret = SessionSecret::generate(ctx.options.password_length);
        match ctx.crypto.encrypt_with_public_key(&chunk.public_key, &secret.to_bytes()) {
            Ok(encrypted) => {
                tcb.secret = Some(secret);
                Some(encrypted)
            }
            Err(e) => {
                warn!("{}: Can't encrypt the session secret: {}", ctx.name, e);
                None
            }
        }
    };
    send_cookie_ack(&tcb, ctx, encrypted_secret);
    ctx.start_live_timers(now);
    *state = State::Established(tcb);
    ctx.emit(MocketEvent::OnConnected());
}

fn send_cookie_ack(
    tcb: &TransmissionControlBlock,
    ctx: &mut Context,
    encrypted_secret: Option<Vec<u8>>,
) {
    let port = ctx.local_addr.map_or(0, |a| a.port());
    ctx.send_chunk(
        tcb.remote_addr,
        tcb.peer.validation,
        Chunk::CookieAck(CookieAckChunk { port, encrypted_secret }),
    );
}

/// The COOKIE-ACK was lost and the initiator echoes the cookie again.
pub(crate) fn handle_duplicate_cookie_echo(
    tcb: &TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
    chunk: CookieEchoChunk,
) {
    let Ok(cookie) = StateCookie::verify(&chunk.cookie, &ctx.cookie_secret, now) else {
        info!("{}: Ignoring COOKIE-ECHO with an invalid cookie", ctx.name);
        return;
    };
    if cookie.responder != tcb.local || cookie.initiator != tcb.peer {
        info!("{}: Ignoring COOKIE-ECHO of another connection", ctx.name);
        return;
    }
    let encrypted_secret = match &tcb.secret {
        Some(secret) if !chunk.public_key.is_empty() => {
            ctx.crypto.encrypt_with_public_key(&chunk.public_key, &secret.to_bytes()).ok()
        }
        _ => None,
    };
    send_cookie_ack(tcb, ctx, encrypted_secret);
}

fn handle_simple_connect(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    header: &PacketHeader,
    chunk: SimpleConnectChunk,
) {
    if header.validation != 0 {
        warn!("{}: Dropping SIMPLE-CONNECT with non-zero validation", ctx.name);
        return;
    }
    let tcb =
        TransmissionControlBlock::new(&ctx.options, random_init_params(), chunk.params, from, now);
    send_simple_connect_ack(&tcb, ctx, now);
    ctx.start_live_timers(now);
    *state = State::Established(tcb);
    ctx.emit(MocketEvent::OnConnected());
}

fn send_simple_connect_ack(tcb: &TransmissionControlBlock, ctx: &mut Context, now: MocketTime) {
    let port = ctx.local_addr.map_or(0, |a| a.port());
    let state_cookie = StateCookie::new(
        now,
        ctx.options.cookie_lifespan,
        tcb.peer,
        tcb.local,
        tcb.remote_addr.port(),
        port,
    )
    .serialize(&ctx.cookie_secret);
    ctx.send_chunk(
        tcb.remote_addr,
        tcb.peer.validation,
        Chunk::SimpleConnectAck(SimpleConnectAckChunk { params: tcb.local, port, state_cookie }),
    );
}

/// The SIMPLE-CONNECT-ACK was lost and the initiator retransmits SIMPLE-CONNECT.
pub(crate) fn handle_duplicate_simple_connect(
    tcb: &TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    chunk: SimpleConnectChunk,
) {
    if from != tcb.remote_addr || chunk.params != tcb.peer {
        info!("{}: Ignoring SIMPLE-CONNECT from {}", ctx.name, from);
        return;
    }
    send_simple_connect_ack(tcb, ctx, now);
}

/// Handles a packet while this side is opening a connection. Only the expected answer, or
/// ABORT, is accepted. Any other state change chunk aborts the attempt, while data and
/// acknowledgements are discarded.
pub(crate) fn handle_handshake_packet(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    from: SocketAddr,
    packet: MocketPacket,
) {
    let (remote_addr, local_validation) = match state {
        State::CookieWait(s) | State::SimpleConnectSent(s) => (s.remote_addr, s.local.validation),
        State::CookieEchoed(s) => (s.remote_addr, s.local.validation),
        _ => return,
    };
    let header = packet.header;
    for chunk in packet.chunks.into_iter().filter(Chunk::is_state_change) {
        if from.ip() != remote_addr.ip() {
            violation(state, ctx, format!("Received {chunk} from unexpected address {from}"));
            return;
        }
        if header.validation != local_validation {
            if let Chunk::Abort(_) = chunk {
                info!("{}: Ignoring ABORT with wrong validation", ctx.name);
                continue;
            }
            violation(state, ctx, format!("Received {chunk} with wrong validation"));
            return;
        }
        match chunk {
            Chunk::Abort(_) => {
                ctx.internal_close(
                    state,
                    Some(ErrorKind::PeerReported),
                    "Connection refused by peer".into(),
                );
            }
            Chunk::InitAck(c) if matches!(state, State::CookieWait(_)) => {
                handle_init_ack(state, ctx, now, c)
            }
            Chunk::InitAck(_) if matches!(state, State::CookieEchoed(_)) => {
                info!("{}: Ignoring duplicate INIT-ACK", ctx.name);
            }
            Chunk::CookieAck(c) if matches!(state, State::CookieEchoed(_)) => {
                handle_cookie_ack(state, ctx, now, c)
            }
            Chunk::SimpleConnectAck(c) if matches!(state, State::SimpleConnectSent(_)) => {
                handle_simple_connect_ack(state, ctx, now, c)
            }
            chunk => {
                violation(state, ctx, format!("Unexpected {chunk} during the handshake"));
            }
        }
        if !state.is_connecting() {
            return;
        }
    }
}

fn violation(state: &mut State, ctx: &mut Context, message: String) {
    warn!("{}: {}", ctx.name, message);
    ctx.abort(state, ErrorKind::ProtocolViolation, message);
}

fn handle_init_ack(state: &mut State, ctx: &mut Context, now: MocketTime, chunk: InitAckChunk) {
    let key_pair = if ctx.options.exchange_keys_at_connect {
        match ctx.crypto.generate_key_pair() {
            Ok(key_pair) => Some(key_pair),
            Err(e) => {
                let message = format!("Failed to generate a key pair: {e}");
                ctx.abort(state, ErrorKind::CryptoFailed, message);
                return;
            }
        }
    } else {
        None
    };
    let cookie_echo = CookieEchoChunk {
        cookie: chunk.state_cookie,
        public_key: key_pair.as_ref().map(|k| k.public_key.clone()).unwrap_or_default(),
    };

    transition_between!(*state,
        State::CookieWait(mut s) => {
            ctx.send_chunk(
                s.remote_addr,
                chunk.params.validation,
                Chunk::CookieEcho(cookie_echo.clone()),
            );
            s.retry.start(now);
            State::CookieEchoed(CookieEchoedState {
                remote_addr: s.remote_addr,
                local: s.local,
                peer: chunk.params,
                cookie_echo,
                key_pair,
                retry: s.retry,
                deadline: s.deadline,
            })
        }
    );
}

fn handle_cookie_ack(state: &mut State, ctx: &mut Context, now: MocketTime, chunk: CookieAckChunk) {
    let State::CookieEchoed(s) = state else { return };
    let mut remote_addr = s.remote_addr;
    remote_addr.set_port(chunk.port);

    let secret = match (&chunk.encrypted_secret, &s.key_pair) {
        (Some(encrypted), Some(key_pair)) => {
            match ctx
                .crypto
                .decrypt_with_private_key(key_pair, encrypted)
                .ok()
                .and_then(|plain| SessionSecret::from_bytes(&plain))
            {
                Some(secret) => Some(secret),
                None => {
                    let message = "Failed to decrypt the session secret".to_string();
                    warn!("{}: {}", ctx.name, message);
                    ctx.abort(state, ErrorKind::CryptoFailed, message);
                    return;
                }
            }
        }
        _ => None,
    };

    let mut tcb = TransmissionControlBlock::new(&ctx.options, s.local, s.peer, remote_addr, now);
    tcb.secret = secret;
    ctx.start_live_timers(now);
    *state = State::Established(tcb);
    ctx.emit(MocketEvent::OnConnected());
}

fn handle_simple_connect_ack(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    chunk: SimpleConnectAckChunk,
) {
    let State::SimpleConnectSent(s) = state else { return };
    let mut remote_addr = s.remote_addr;
    remote_addr.set_port(chunk.port);
    let tcb = TransmissionControlBlock::new(&ctx.options, s.local, chunk.params, remote_addr, now);
    ctx.start_live_timers(now);
    *state = State::Established(tcb);
    ctx.emit(MocketEvent::OnConnected());
}

/// Retransmits the handshake chunk, and gives up when the connect timeout has expired.
pub(crate) fn handle_connect_timeouts(state: &mut State, ctx: &mut Context, now: MocketTime) {
    let timed_out = match state {
        State::CookieWait(s) => {
            let timed_out = s.deadline.fire(now);
            if !timed_out && s.retry.fire(now) {
                ctx.send_chunk(s.remote_addr, 0, Chunk::Init(InitChunk { params: s.local }));
            }
            timed_out
        }
        State::SimpleConnectSent(s) => {
            let timed_out = s.deadline.fire(now);
            if !timed_out && s.retry.fire(now) {
                let chunk = Chunk::SimpleConnect(SimpleConnectChunk { params: s.local });
                ctx.send_chunk(s.remote_addr, 0, chunk);
            }
            timed_out
        }
        State::CookieEchoed(s) => {
            let timed_out = s.deadline.fire(now);
            if !timed_out && s.retry.fire(now) {
                let chunk = Chunk::CookieEcho(s.cookie_echo.clone());
                ctx.send_chunk(s.remote_addr, s.peer.validation, chunk);
            }
            timed_out
        }
        _ => false,
    };
    if timed_out {
        ctx.internal_close(state, Some(ErrorKind::Timeout), "Connection attempt timed out".into());
    }
}

/// Deadlines of the handshake timers.
pub(crate) fn connect_deadlines(state: &State) -> [Option<MocketTime>; 2] {
    match state {
        State::CookieWait(s) | State::SimpleConnectSent(s) => {
            [s.retry.deadline(), s.deadline.deadline()]
        }
        State::CookieEchoed(s) => [s.retry.deadline(), s.deadline.deadline()],
        _ => [None, None],
    }
}
