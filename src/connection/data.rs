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

use crate::api::Message;
use crate::api::MocketTime;
use crate::api::SendStatus;
use crate::connection::context::Context;
use crate::connection::state::State;
use crate::connection::transmission_control_block::TransmissionControlBlock;
use crate::packet::cancelled_chunk::CancelledChunk;
use crate::packet::chunk::Chunk;
use crate::packet::data_chunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::mocket_packet::DELIVERY_PREREQUISITES_SIZE;
use crate::packet::mocket_packet::FLAG_RETRANSMITTED;
use crate::packet::mocket_packet::HEADER_SIZE;
use crate::packet::mocket_packet::MocketPacket;
use crate::packet::mocket_packet::PacketBuilder;
use crate::packet::sack_chunk::SackChunk;
use crate::tx::unacknowledged_packet_queue::OutstandingPacket;
use crate::types::Flow;
use crate::types::Tsn;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::warn;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as warn;

/// The largest range of TSNs that a single CANCELLED block may skip. Anything larger can't
/// have been sent within one window.
const MAX_CANCELLED_RANGE: u32 = 1 << 16;

/// The size of the packet that carries `message`.
pub(crate) fn packet_size(ctx: &Context, message: &Message) -> usize {
    let prerequisites = if ctx.options.cross_sequencing && message.flow.is_sequenced() {
        DELIVERY_PREREQUISITES_SIZE
    } else {
        0
    };
    HEADER_SIZE + prerequisites + data_chunk::HEADER_SIZE + message.payload.len()
}

pub(crate) fn send_message(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    message: Message,
) -> SendStatus {
    let tcb = match state {
        State::Established(tcb) => tcb,
        State::Closed | State::Listening | State::CookieWait(_) | State::CookieEchoed(_)
        | State::SimpleConnectSent(_) => return SendStatus::ErrorNotConnected,
        _ => return SendStatus::ErrorShuttingDown,
    };
    if packet_size(ctx, &message) > ctx.options.mtu {
        return SendStatus::ErrorMessageTooLarge;
    }
    if !message.flow.is_reliable() {
        ctx.tx_messages_count += 1;
        transmit(tcb, ctx, now, message);
        return SendStatus::Success;
    }
    if ctx.pending.is_empty() && tcb.window_allows(packet_size(ctx, &message)) {
        ctx.tx_messages_count += 1;
        transmit(tcb, ctx, now, message);
        return SendStatus::Success;
    }
    if !ctx.pending.push(message) {
        return SendStatus::ErrorResourceExhaustion;
    }
    ctx.tx_messages_count += 1;
    SendStatus::Success
}

/// Sends `message` in a packet of its own, and keeps it for retransmission if its flow is
/// reliable.
fn transmit(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
    message: Message,
) {
    let flow = message.flow;
    let prerequisites = tcb.delivery_prerequisites();
    let tsn = tcb.assign_tsn(flow);
    let mut builder = tcb.new_packet(flow, tsn);
    builder.header_mut().set_fragment(message.fragment);
    if ctx.options.cross_sequencing && flow.is_sequenced() {
        builder.set_delivery_prerequisites(&prerequisites);
    }
    let chunk = Chunk::Data(DataChunk { tag: message.tag, payload: message.payload });
    if let Err(e) = builder.add(&chunk) {
        // Sizes are checked when the message is accepted.
        warn!("{}: Failed to build packet for {}: {}", ctx.name, tsn, e);
        return;
    }
    if let Some(queue) = tcb.queue(flow) {
        let stored =
            OutstandingPacket::new(tsn, builder.bytes_without_piggyback(), now, tcb.rto.rto());
        if !queue.lock().insert(stored) {
            warn!("{}: Can't keep {} {} for retransmission", ctx.name, flow, tsn);
        }
    }
    tcb.add_piggyback(&mut builder, now, ctx.options.cancelled_tsn_interval);
    let packet = builder.build();
    ctx.send_packet(tcb.remote_addr, packet);
    ctx.keep_alive.start(now);
}

/// Sends reliable messages that were held back, for as long as the peer's window allows.
pub(crate) fn drain_pending(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
) {
    while let Some(message) = ctx.pending.peek() {
        if !tcb.window_allows(packet_size(ctx, message)) {
            return;
        }
        let Some(message) = ctx.pending.pop() else { return };
        transmit(tcb, ctx, now, message);
    }
}

/// Retransmits every reliable packet whose retransmission timeout has expired.
pub(crate) fn retransmit_timed_out(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
) {
    for flow in [Flow::Control, Flow::ReliableSequenced, Flow::ReliableUnsequenced] {
        let Some(queue) = tcb.queue(flow).cloned() else { continue };
        // Each packet is retransmitted at most once per call.
        let count = queue.lock().packet_count();
        for _ in 0..count {
            let Some((tsn, data, retransmit_count)) = queue
                .lock()
                .next_timed_out_packet(now)
                .map(|p| (p.tsn, p.data.clone(), p.retransmit_count))
            else {
                break;
            };
            let mut builder = PacketBuilder::from_stored(&data, tcb.max_packet_size());
            builder.header_mut().flags |= FLAG_RETRANSMITTED;
            builder.header_mut().window_size = tcb.window_size();
            tcb.add_piggyback(&mut builder, now, ctx.options.cancelled_tsn_interval);
            let packet = builder.build();
            ctx.send_packet(tcb.remote_addr, packet);
            ctx.rtx_packets_count += 1;

            let rto = tcb.rto.backed_off(retransmit_count + 1, ctx.options.rto_backoff_factor);
            queue.lock().packet_retransmitted(tsn, now, rto);
            debug!("{}: Retransmitted {} {} (#{})", ctx.name, flow, tsn, retransmit_count + 1);
        }
    }
    if tcb.queues().iter().any(|q| !q.lock().is_empty()) {
        ctx.keep_alive.start(now);
    }
}

/// Handles the DATA chunk of a packet received from the peer.
pub(crate) fn handle_data(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
    packet: &MocketPacket,
    chunk: DataChunk,
) {
    let header = &packet.header;
    let flow = header.flow();
    let tsn = header.sequence_number;
    if flow.is_reliable() {
        if tcb.window_size() == 0 && !tcb.receive_queue.has_received(flow, tsn) {
            // Not acknowledged, so that it's retransmitted once the application has caught up.
            debug!("{}: Receive window full, dropping {} {}", ctx.name, flow, tsn);
            // The packets that did fit are acknowledged right away, along with the closed
            // window in the header.
            tcb.ack_manager.request_immediate_ack();
            return;
        }
        if !tcb.ack_manager.received_packet(now, flow, tsn, packet.size_without_piggyback()) {
            debug!(
                "{}: Duplicate {} {}, cumulative ack {:?}",
                ctx.name,
                flow,
                tsn,
                tcb.ack_manager.cumulative_tsn(flow)
            );
            ctx.rx_duplicate_packets_count += 1;
            return;
        }
    } else {
        tcb.ack_manager.received_packet(now, flow, tsn, packet.size_without_piggyback());
    }
    let message =
        Message { flow, tag: chunk.tag, fragment: header.fragment(), payload: chunk.payload };
    if !tcb.receive_queue.add(tsn, packet.delivery_prerequisites, message) && flow.is_reliable() {
        ctx.rx_duplicate_packets_count += 1;
    }
}

/// Removes what the peer acknowledges from the unacknowledged packet queues.
pub(crate) fn handle_sack(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
    sack: &SackChunk,
) {
    for flow in [Flow::Control, Flow::ReliableSequenced, Flow::ReliableUnsequenced] {
        let (Some(ack), Some(queue)) = (sack.flow(flow), tcb.queue(flow)) else { continue };
        // Nothing at or after the next TSN has been sent yet.
        let next = tcb.next_tsn(flow);
        if ack.cumulative_tsn >= next {
            warn!("{}: Ignoring {} ack of unsent {}", ctx.name, flow, ack.cumulative_tsn);
            continue;
        }
        let mut queue = queue.lock();
        queue.acknowledge_up_to(ack.cumulative_tsn, now);
        for &(begin, end) in &ack.blocks.ranges {
            queue.acknowledge_range(begin, end, now);
        }
        for &single in &ack.blocks.singles {
            queue.acknowledge_range(single, single, now);
        }
    }
    tcb.cancelled.process_sack(sack);
}

/// Records the packets that the peer has given up on, so that later packets don't wait for
/// them, and so that the reliable ones are acknowledged.
pub(crate) fn handle_cancelled(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
    chunk: &CancelledChunk,
) {
    for flow in [Flow::ReliableSequenced, Flow::ReliableUnsequenced, Flow::UnreliableSequenced] {
        let Some(blocks) = chunk.blocks(flow) else { continue };
        let ranges = blocks.ranges.iter().copied().chain(blocks.singles.iter().map(|&t| (t, t)));
        for (begin, end) in ranges {
            if end < begin || begin.distance_to(end) > MAX_CANCELLED_RANGE {
                warn!("{}: Ignoring cancelled {} range {}-{}", ctx.name, flow, begin, end);
                continue;
            }
            let mut tsn = begin;
            loop {
                skip_cancelled(tcb, now, flow, tsn);
                if tsn == end {
                    break;
                }
                tsn += 1;
            }
        }
    }
}

fn skip_cancelled(tcb: &mut TransmissionControlBlock, now: MocketTime, flow: Flow, tsn: Tsn) {
    if flow.is_reliable() {
        if tcb.receive_queue.has_received(flow, tsn) {
            return;
        }
        tcb.ack_manager.received_packet(now, flow, tsn, 0);
    }
    tcb.receive_queue.skip(flow, tsn);
}

/// Sends a packet with only acknowledgement information, when a SACK is due and no other
/// packet has carried it.
pub(crate) fn maybe_send_sack(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: MocketTime,
) {
    let due = tcb.sack_deadline(ctx.options.sack_delay).is_some_and(|d| d <= now);
    if !due {
        return;
    }
    let mut builder = tcb.new_control_packet();
    tcb.add_piggyback(&mut builder, now, ctx.options.cancelled_tsn_interval);
    if !builder.is_empty() {
        let packet = builder.build();
        ctx.send_packet(tcb.remote_addr, packet);
    }
}

/// Cancels the messages with `tag` in `flow` that are waiting to be sent or to be
/// acknowledged. The control flow can't be cancelled.
pub(crate) fn cancel(
    state: &mut State,
    ctx: &mut Context,
    now: MocketTime,
    flow: Flow,
    tag: u16,
) -> usize {
    if flow == Flow::Control {
        return 0;
    }
    let Some(tcb) = state.live_tcb_mut() else { return 0 };
    let mut cancelled = ctx.pending.cancel(flow, tag);
    if let Some(queue) = tcb.queue(flow) {
        cancelled += queue.lock().cancel(flow, tag, now, &tcb.cancelled);
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Options;
    use crate::packet::init_chunk::InitParams;
    use crate::api::MocketEvent;
    use crate::packet::sack_chunk::FlowAck;
    use crate::testing::context_for_test;
    use crate::testing::take_events;
    use std::time::Duration;

    fn params(validation: u32, base: u32) -> InitParams {
        InitParams {
            validation,
            control_tsn: Tsn(base),
            rel_seq_tsn: Tsn(base + 100),
            unrel_seq_tsn: Tsn(base + 200),
            rel_unseq_id: Tsn(base + 300),
            unrel_unseq_id: Tsn(base + 400),
        }
    }

    fn established(options: &Options) -> State {
        State::Established(TransmissionControlBlock::new(
            options,
            params(1, 1000),
            params(2, 5000),
            "127.0.0.1:2000".parse().unwrap(),
            MocketTime::zero(),
        ))
    }

    fn at(ms: u64) -> MocketTime {
        MocketTime::from(Duration::from_millis(ms))
    }

    fn sack(control: u32, reliable_sequenced: u32, reliable_unsequenced: u32) -> SackChunk {
        SackChunk {
            control: FlowAck::new(Tsn(control)),
            reliable_sequenced: FlowAck::new(Tsn(reliable_sequenced)),
            reliable_unsequenced: FlowAck::new(Tsn(reliable_unsequenced)),
            bandwidth_sample: None,
        }
    }

    fn sent_packets(ctx: &Context) -> Vec<MocketPacket> {
        take_events(ctx)
            .into_iter()
            .filter_map(|e| match e {
                MocketEvent::SendPacket(_, data) => MocketPacket::from_bytes(&data).ok(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn send_when_not_connected() {
        let mut ctx = context_for_test(Options::default());
        let mut state = State::Closed;
        let message = Message::new(Flow::ReliableSequenced, 0, vec![1]);
        assert_eq!(
            send_message(&mut state, &mut ctx, MocketTime::zero(), message),
            SendStatus::ErrorNotConnected
        );
    }

    #[test]
    fn send_too_large_message() {
        let options = Options { mtu: 100, ..Default::default() };
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        let message = Message::new(Flow::ReliableSequenced, 0, vec![0; 100]);
        assert_eq!(
            send_message(&mut state, &mut ctx, MocketTime::zero(), message),
            SendStatus::ErrorMessageTooLarge
        );
    }

    #[test]
    fn reliable_message_is_kept_until_acked() {
        let options = Options::default();
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        let message = Message::new(Flow::ReliableSequenced, 3, b"hello".to_vec());
        let status = send_message(&mut state, &mut ctx, MocketTime::zero(), message);
        assert_eq!(status, SendStatus::Success);

        let mut packets = sent_packets(&ctx);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header.validation, 2);
        assert_eq!(packets[0].header.flow(), Flow::ReliableSequenced);
        assert_eq!(packets[0].header.sequence_number, Tsn(1100));
        assert_eq!(packets[0].take_data_chunk().unwrap().payload, b"hello");

        let State::Established(tcb) = &mut state else { panic!() };
        assert_eq!(tcb.unack_packets(), 1);

        handle_sack(tcb, &mut ctx, at(10), &sack(999, 1100, 1299));
        assert_eq!(tcb.unack_packets(), 0);
    }

    #[test]
    fn ack_of_unsent_tsn_is_ignored() {
        let options = Options::default();
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        let message = Message::new(Flow::ReliableSequenced, 0, vec![1]);
        send_message(&mut state, &mut ctx, MocketTime::zero(), message);

        let State::Established(tcb) = &mut state else { panic!() };
        handle_sack(tcb, &mut ctx, at(10), &sack(999, 1101, 1299));
        assert_eq!(tcb.unack_packets(), 1);
    }

    #[test]
    fn unreliable_message_is_not_kept() {
        let options = Options::default();
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        let message = Message::new(Flow::UnreliableSequenced, 0, vec![1, 2]);
        let status = send_message(&mut state, &mut ctx, MocketTime::zero(), message);
        assert_eq!(status, SendStatus::Success);
        let packets = sent_packets(&ctx);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header.sequence_number, Tsn(1200));
        assert_eq!(state.tcb().unwrap().unack_packets(), 0);
    }

    #[test]
    fn closed_window_queues_messages() {
        let options = Options { max_window_size: 100, ..Default::default() };
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        for _ in 0..3 {
            let message = Message::new(Flow::ReliableSequenced, 0, vec![0; 40]);
            let status = send_message(&mut state, &mut ctx, MocketTime::zero(), message);
            assert_eq!(status, SendStatus::Success);
        }
        // 60 bytes per packet, and the first one is always allowed.
        assert_eq!(sent_packets(&ctx).len(), 1);
        assert_eq!(ctx.pending.len(), 2);

        let State::Established(tcb) = &mut state else { panic!() };
        handle_sack(tcb, &mut ctx, at(5), &sack(999, 1100, 1299));
        drain_pending(tcb, &mut ctx, at(5));
        assert_eq!(sent_packets(&ctx).len(), 1);
        assert_eq!(ctx.pending.len(), 1);
    }

    #[test]
    fn timed_out_packet_is_retransmitted_with_flag() {
        let options = Options::default();
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        let message = Message::new(Flow::ReliableUnsequenced, 0, vec![7]);
        send_message(&mut state, &mut ctx, MocketTime::zero(), message);
        sent_packets(&ctx);

        let State::Established(tcb) = &mut state else { panic!() };
        let rto = tcb.rto.rto();
        retransmit_timed_out(tcb, &mut ctx, MocketTime::zero() + rto - Duration::from_millis(1));
        assert!(sent_packets(&ctx).is_empty());

        retransmit_timed_out(tcb, &mut ctx, MocketTime::zero() + rto);
        let packets = sent_packets(&ctx);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].header.has_flag(FLAG_RETRANSMITTED));
        assert_eq!(packets[0].header.sequence_number, Tsn(1300));
        assert_eq!(ctx.rtx_packets_count, 1);
    }

    #[test]
    fn cancel_removes_outstanding_packets() {
        let options = Options::default();
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        for tag in [1, 2, 1] {
            let message = Message::new(Flow::ReliableSequenced, tag, vec![0; 10]);
            send_message(&mut state, &mut ctx, MocketTime::zero(), message);
        }
        assert_eq!(cancel(&mut state, &mut ctx, MocketTime::zero(), Flow::ReliableSequenced, 1), 2);
        assert_eq!(cancel(&mut state, &mut ctx, MocketTime::zero(), Flow::Control, 2), 0);
        let tcb = state.tcb().unwrap();
        assert_eq!(tcb.unack_packets(), 1);
        assert!(tcb.cancelled.have_information());
    }

    #[test]
    fn received_cancelled_unblocks_sequenced_flow() {
        let options = Options::default();
        let mut ctx = context_for_test(options.clone());
        let mut state = established(&options);
        let State::Established(tcb) = &mut state else { panic!() };

        let mut chunk = CancelledChunk::default();
        chunk.reliable_sequenced.singles.push(Tsn(5100));
        handle_cancelled(tcb, &mut ctx, MocketTime::zero(), &chunk);
        assert_eq!(tcb.receive_queue.next_expected(Flow::ReliableSequenced), Some(Tsn(5101)));
        assert_eq!(tcb.ack_manager.cumulative_tsn(Flow::ReliableSequenced), Some(Tsn(5100)));
    }
}
