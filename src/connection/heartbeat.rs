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

use crate::api::MocketEvent;
use crate::api::MocketTime;
use crate::connection::context::Context;
use crate::connection::state::State;
use crate::connection::transmission_control_block::TransmissionControlBlock;
use crate::packet::chunk::Chunk;
use crate::packet::timestamp_chunks::HeartbeatChunk;
use crate::packet::timestamp_chunks::TimestampAckChunk;
use crate::packet::timestamp_chunks::TimestampChunk;
use std::time::Duration;

/// Records that a packet has arrived from the peer.
pub(crate) fn peer_heard(tcb: &mut TransmissionControlBlock, ctx: &Context, now: MocketTime) {
    if tcb.peer_unreachable {
        tcb.peer_unreachable = false;
        ctx.emit(MocketEvent::OnPeerReachable(now - tcb.last_received));
    }
    tcb.last_received = now;
}

pub(crate) fn handle_timestamp(
    tcb: &mut TransmissionControlBlock,
    now: MocketTime,
    chunk: TimestampChunk,
) {
    tcb.pending_timestamp_ack = Some((chunk.timestamp, now));
}

/// The peer echoes our timestamp, shifted by the time it held on to it, which gives a round
/// trip time sample.
pub(crate) fn handle_timestamp_ack(
    tcb: &mut TransmissionControlBlock,
    now: MocketTime,
    chunk: TimestampAckChunk,
) {
    let rtt = now.as_millis() - chunk.timestamp;
    if rtt >= 0 {
        tcb.rto.observe_rtt(Duration::from_millis(rtt as u64));
    }
}

fn send_heartbeat(tcb: &mut TransmissionControlBlock, ctx: &mut Context, now: MocketTime) {
    let mut builder = tcb.new_control_packet();
    if builder.add(&Chunk::Heartbeat(HeartbeatChunk { timestamp: now.as_millis() })).is_ok() {
        tcb.add_piggyback(&mut builder, now, ctx.options.cancelled_tsn_interval);
        let packet = builder.build();
        ctx.send_packet(tcb.remote_addr, packet);
    }
}

pub(crate) fn handle_heartbeat_timeouts(state: &mut State, ctx: &mut Context, now: MocketTime) {
    let suspend_received = matches!(state, State::SuspendReceived(_));
    let live = state.is_live();
    let Some(tcb) = state.tcb_mut() else { return };

    if ctx.keep_alive.fire(now) && live {
        send_heartbeat(tcb, ctx, now);
    }

    if ctx.cancelled_resend.fire(now) && live && tcb.cancelled.have_information() {
        let mut builder = tcb.new_control_packet();
        tcb.add_piggyback(&mut builder, now, ctx.options.cancelled_tsn_interval);
        if !builder.is_empty() {
            let packet = builder.build();
            ctx.send_packet(tcb.remote_addr, packet);
        }
    }

    if ctx.liveness.fire(now) {
        let silent_for = now - tcb.last_received;
        if silent_for >= ctx.liveness.interval() {
            if suspend_received {
                ctx.emit(MocketEvent::OnSuspendReceived(silent_for));
            } else if live {
                tcb.peer_unreachable = true;
                ctx.emit(MocketEvent::OnPeerUnreachable(silent_for));
            }
        }
    }
}
