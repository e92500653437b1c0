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
use crate::connection::state::FlushingState;
use crate::connection::state::ShutdownState;
use crate::connection::state::State;
use crate::packet::chunk::Chunk;
use crate::packet::header_only_chunks::ShutdownAckChunk;
use crate::packet::header_only_chunks::ShutdownChunk;
use crate::packet::header_only_chunks::ShutdownCompleteChunk;
use crate::timer::Timer;
use crate::transition_between;

pub(crate) fn do_shutdown(state: &mut State, ctx: &mut Context, now: MocketTime) {
    match state {
        State::Closed
        | State::ShutdownPending(_)
        | State::ShutdownSent(_)
        | State::ShutdownReceived(_)
        | State::ShutdownAckSent(_) => {
            // Already closed or shutting down.
        }
        State::Listening
        | State::CookieWait(_)
        | State::CookieEchoed(_)
        | State::SimpleConnectSent(_) => {
            // Nothing has been exchanged, so there is nothing to flush.
            ctx.internal_close(state, None, String::new());
        }
        State::Established(_) => {
            let mut deadline = Timer::once(ctx.options.flush_timeout);
            deadline.start(now);
            transition_between!(*state,
                State::Established(tcb) => State::ShutdownPending(FlushingState { tcb, deadline })
            );
            maybe_send_shutdown(state, ctx, now);
        }
        _ => ctx.emit(MocketEvent::OnError(
            ErrorKind::WrongState,
            "Can't shut down while suspending, suspended or resuming".into(),
        )),
    }
}

fn flushed(state: &State, ctx: &Context) -> bool {
    ctx.pending.is_empty() && state.tcb().is_some_and(|tcb| tcb.is_flushed())
}

fn retry_timer(ctx: &Context, now: MocketTime) -> Timer {
    let mut retry =
        Timer::new(ctx.options.shutdown_timeout, Some(ctx.options.max_shutdown_attempts));
    retry.start(now);
    retry
}

/// Sends SHUTDOWN once all reliable data has been acknowledged.
fn maybe_send_shutdown(state: &mut State, ctx: &mut Context, now: MocketTime) {
    if !matches!(state, State::ShutdownPending(_)) || !flushed(state, ctx) {
        return;
    }
    let retry = retry_timer(ctx, now);
    transition_between!(*state,
        State::ShutdownPending(s) => State::ShutdownSent(ShutdownState { tcb: s.tcb, retry })
    );
    send_shutdown(state, ctx);
}

/// Sends SHUTDOWN-ACK once all reliable data has been acknowledged.
fn maybe_send_shutdown_ack(state: &mut State, ctx: &mut Context, now: MocketTime) {
    if !matches!(state, State::ShutdownReceived(_)) || !flushed(state, ctx) {
        return;
    }
    enter_shutdown_ack_sent(state, ctx, now);
}

fn enter_shutdown_ack_sent(state: &mut State, ctx: &mut Context, now: MocketTime) {
    let retry = retry_timer(ctx, now);
    transition_between!(*state,
        State::ShutdownReceived(FlushingState { tcb, .. })
        | State::ShutdownSent(ShutdownState { tcb, .. }) => {
            State::ShutdownAckSent(ShutdownState { tcb, retry })
        }
    );
    send_shutdown_ack(state, ctx);
}

fn send_shutdown(state: &State, ctx: &mut Context) {
    if let State::ShutdownSent(s) = state {
        ctx.send_to_peer(&s.tcb, Chunk::Shutdown(ShutdownChunk {}));
    }
}

fn send_shutdown_ack(state: &State, ctx: &mut Context) {
    if let State::ShutdownAckSent(s) = state {
        ctx.send_to_peer(&s.tcb, Chunk::ShutdownAck(ShutdownAckChunk {}));
    }
}

/// Sends SHUTDOWN or SHUTDOWN-ACK when the outstanding data has been flushed.
pub(crate) fn progress_shutdown(state: &mut State, ctx: &mut Context, now: MocketTime) {
    match state {
        State::ShutdownPending(_) => maybe_send_shutdown(state, ctx, now),
        State::ShutdownReceived(_) => maybe_send_shutdown_ack(state, ctx, now),
        _ => {}
    }
}

pub(crate) fn handle_shutdown(state: &mut State, ctx: &mut Context, now: MocketTime) {
    match state {
        State::Established(_) | State::ShutdownPending(_) => {
            let mut deadline = Timer::once(ctx.options.flush_timeout);
            deadline.start(now);
            transition_between!(*state,
                State::Established(tcb) | State::ShutdownPending(FlushingState { tcb, .. }) => {
                    State::ShutdownReceived(FlushingState { tcb, deadline })
                }
            );
            maybe_send_shutdown_ack(state, ctx, now);
        }
        State::ShutdownSent(_) => {
            // Both sides shut down at the same time.
            enter_shutdown_ack_sent(state, ctx, now);
        }
        State::ShutdownAckSent(_) => send_shutdown_ack(state, ctx),
        _ => {}
    }
}

pub(crate) fn handle_shutdown_ack(state: &mut State, ctx: &mut Context) {
    match state {
        State::ShutdownSent(s) | State::ShutdownAckSent(s) => {
            ctx.send_to_peer(&s.tcb, Chunk::ShutdownComplete(ShutdownCompleteChunk {}));
            ctx.internal_close(state, None, String::new());
        }
        _ => {}
    }
}

pub(crate) fn handle_shutdown_complete(state: &mut State, ctx: &mut Context) {
    if let State::ShutdownAckSent(_) = state {
        ctx.internal_close(state, None, String::new());
    }
}

/// Retransmits SHUTDOWN and SHUTDOWN-ACK. The connection is considered closed when the peer
/// hasn't answered after the configured number of attempts.
pub(crate) fn handle_shutdown_timeouts(state: &mut State, ctx: &mut Context, now: MocketTime) {
    match state {
        State::ShutdownPending(s) => {
            if s.deadline.fire(now) {
                ctx.abort(state, ErrorKind::Timeout, "Flushing before shutdown timed out".into());
            }
        }
        State::ShutdownReceived(s) => {
            if s.deadline.fire(now) {
                enter_shutdown_ack_sent(state, ctx, now);
            }
        }
        State::ShutdownSent(s) | State::ShutdownAckSent(s) => {
            if !s.retry.fire(now) {
                return;
            }
            if !s.retry.is_running() {
                ctx.internal_close(state, None, String::new());
                return;
            }
            send_shutdown(state, ctx);
            send_shutdown_ack(state, ctx);
        }
        _ => {}
    }
}

pub(crate) fn shutdown_deadline(state: &State) -> Option<MocketTime> {
    match state {
        State::ShutdownPending(s) | State::ShutdownReceived(s) => s.deadline.deadline(),
        State::ShutdownSent(s) | State::ShutdownAckSent(s) => s.retry.deadline(),
        _ => None,
    }
}
