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

use crate::api::MocketTime;
use crate::api::Options;
use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use crate::connection::suspend::SessionSecret;
use crate::packet::chunk::Chunk;
use crate::packet::init_chunk::InitParams;
use crate::packet::mocket_packet::DeliveryPrerequisites;
use crate::packet::mocket_packet::PacketBuilder;
use crate::packet::mocket_packet::PacketHeader;
use crate::packet::timestamp_chunks::TimestampAckChunk;
use crate::packet::timestamp_chunks::TimestampChunk;
use crate::rx::ack_manager::AckManager;
use crate::rx::receive_queue::ReceiveQueue;
use crate::tx::cancelled_tsn_manager::CancelledTsnManager;
use crate::tx::retransmission_timeout::RetransmissionTimeout;
use crate::tx::unacknowledged_packet_queue::UnacknowledgedPacketQueue;
use crate::types::Flow;
use crate::types::Tsn;
#[cfg(not(test))]
use log::debug;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use std::println as debug;

const ADDR_V4: u8 = 4;
const ADDR_V6: u8 = 6;

/// Everything that is known about an established connection.
///
/// The acknowledgement and cancellation managers and the unacknowledged packet queues are
/// internally locked and reference counted, so that they can be handed to code that runs
/// outside of the connection's own lock.
pub struct TransmissionControlBlock {
    pub local: InitParams,
    pub peer: InitParams,
    pub remote_addr: SocketAddr,

    /// The TSN (or message id) that the next packet of each flow will carry, indexed by
    /// [`Flow::code`].
    next_tsn: [Tsn; 5],

    pub ack_manager: Arc<AckManager>,
    pub cancelled: Arc<CancelledTsnManager>,
    pub control_queue: Arc<UnacknowledgedPacketQueue>,
    pub reliable_sequenced_queue: Arc<UnacknowledgedPacketQueue>,
    pub reliable_unsequenced_queue: Arc<UnacknowledgedPacketQueue>,
    pub receive_queue: ReceiveQueue,
    pub rto: RetransmissionTimeout,

    /// The window the peer announced in its most recent packet.
    pub peer_window: u32,

    /// Exchanged during the handshake or the first suspension, and needed to resume.
    pub secret: Option<SessionSecret>,

    pub last_received: MocketTime,
    pub last_sack_sent: Option<MocketTime>,
    pub last_cancelled_sent: Option<MocketTime>,
    pub last_timestamp_sent: Option<MocketTime>,

    /// A timestamp received from the peer, and when it arrived, to be echoed back.
    pub pending_timestamp_ack: Option<(i64, MocketTime)>,

    /// Set once the peer has been reported unreachable, until something arrives.
    pub peer_unreachable: bool,

    max_window_size: u32,
    max_packet_size: usize,
    timestamp_interval: Duration,
}

impl TransmissionControlBlock {
    pub fn new(
        options: &Options,
        local: InitParams,
        peer: InitParams,
        remote_addr: SocketAddr,
        now: MocketTime,
    ) -> Self {
        let ack_manager = AckManager::new(options.bandwidth_estimation);
        ack_manager.init(peer.control_tsn, peer.rel_seq_tsn, peer.rel_unseq_id);
        let queue =
            |flow| Arc::new(UnacknowledgedPacketQueue::new(flow, options.detect_lost_packets));
        Self {
            local,
            peer,
            remote_addr,
            next_tsn: Flow::ALL.map(|flow| local.initial_tsn(flow)),
            ack_manager: Arc::new(ack_manager),
            cancelled: Arc::new(CancelledTsnManager::new()),
            control_queue: queue(Flow::Control),
            reliable_sequenced_queue: queue(Flow::ReliableSequenced),
            reliable_unsequenced_queue: queue(Flow::ReliableUnsequenced),
            receive_queue: ReceiveQueue::new(&peer),
            rto: RetransmissionTimeout::new(options),
            peer_window: options.max_window_size,
            secret: None,
            last_received: now,
            last_sack_sent: None,
            last_cancelled_sent: None,
            last_timestamp_sent: None,
            pending_timestamp_ack: None,
            peer_unreachable: false,
            max_window_size: options.max_window_size,
            max_packet_size: options.mtu,
            timestamp_interval: options.timestamp_interval,
        }
    }

    /// The unacknowledged packet queue of a reliable flow.
    pub fn queue(&self, flow: Flow) -> Option<&Arc<UnacknowledgedPacketQueue>> {
        match flow {
            Flow::Control => Some(&self.control_queue),
            Flow::ReliableSequenced => Some(&self.reliable_sequenced_queue),
            Flow::ReliableUnsequenced => Some(&self.reliable_unsequenced_queue),
            Flow::UnreliableSequenced | Flow::UnreliableUnsequenced => None,
        }
    }

    pub fn queues(&self) -> [&Arc<UnacknowledgedPacketQueue>; 3] {
        [&self.control_queue, &self.reliable_sequenced_queue, &self.reliable_unsequenced_queue]
    }

    pub fn next_tsn(&self, flow: Flow) -> Tsn {
        self.next_tsn[flow.code() as usize]
    }

    /// Returns the TSN of the next packet in `flow`, and advances it.
    pub fn assign_tsn(&mut self, flow: Flow) -> Tsn {
        let next = &mut self.next_tsn[flow.code() as usize];
        let tsn = *next;
        *next += 1;
        tsn
    }

    /// What a packet must wait for in the other sequenced flows: everything sent in them so
    /// far.
    pub fn delivery_prerequisites(&self) -> DeliveryPrerequisites {
        DeliveryPrerequisites {
            control: self.next_tsn(Flow::Control),
            reliable_sequenced: self.next_tsn(Flow::ReliableSequenced),
            unreliable_sequenced: self.next_tsn(Flow::UnreliableSequenced),
        }
    }

    /// The receive window announced to the peer.
    pub fn window_size(&self) -> u32 {
        self.max_window_size.saturating_sub(self.receive_queue.buffered_bytes() as u32)
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Creates a builder for a packet carrying `tsn` in `flow`.
    pub fn new_packet(&self, flow: Flow, tsn: Tsn) -> PacketBuilder {
        PacketBuilder::new(
            PacketHeader::for_flow(flow, tsn, self.peer.validation, self.window_size()),
            self.max_packet_size,
        )
    }

    /// Creates a builder for a packet that isn't numbered in any flow, for state change
    /// chunks and lone acknowledgements.
    pub fn new_control_packet(&self) -> PacketBuilder {
        PacketBuilder::new(
            PacketHeader::new(self.peer.validation, self.window_size()),
            self.max_packet_size,
        )
    }

    pub fn unack_bytes(&self) -> usize {
        self.queues().iter().map(|q| q.lock().bytes_in_queue()).sum()
    }

    pub fn unack_packets(&self) -> usize {
        self.queues().iter().map(|q| q.lock().packet_count()).sum()
    }

    /// Whether a reliable packet of `size` bytes may be sent now. A single packet is always
    /// allowed when nothing is outstanding, so that a small window can't stall the flow.
    pub fn window_allows(&self, size: usize) -> bool {
        let unack = self.unack_bytes();
        let window = self.peer_window.min(self.max_window_size) as usize;
        unack == 0 || unack + size <= window
    }

    /// Returns true when every reliable packet sent has been acknowledged.
    pub fn is_flushed(&self) -> bool {
        self.queues().iter().all(|q| q.lock().is_empty())
    }

    /// When a SACK must be sent at the latest, if anything is waiting to be acknowledged.
    ///
    /// Each arrival pushes the delayed SACK back, but when new packets keep arriving, a SACK
    /// still goes out `sack_delay` after the previous one.
    pub fn sack_deadline(&self, sack_delay: Duration) -> Option<MocketTime> {
        let deadline = self.ack_manager.next_ack_deadline(sack_delay)?;
        match self.last_sack_sent {
            Some(sent) if self.ack_manager.has_new_info_since(sent) => {
                Some(deadline.min(sent + sack_delay))
            }
            _ => Some(deadline),
        }
    }

    /// Adds acknowledgement, cancellation and timing information that is due, as space
    /// permits.
    pub fn add_piggyback(
        &mut self,
        builder: &mut PacketBuilder,
        now: MocketTime,
        cancelled_interval: Duration,
    ) {
        if self.ack_manager.has_pending_ack() {
            match self.ack_manager.append_to(now, builder) {
                Ok(()) => self.last_sack_sent = Some(now),
                Err(e) => {
                    debug!(
                        "SACK left for a later packet, {} bytes free: {e}",
                        builder.bytes_remaining()
                    );
                }
            }
        }
        if self.cancelled.have_information() {
            let due = match self.last_cancelled_sent {
                None => true,
                Some(last) => {
                    now - last >= cancelled_interval
                        || self.cancelled.last_update().is_some_and(|t| t > last)
                }
            };
            if due && self.cancelled.append_to(builder).is_ok() {
                self.last_cancelled_sent = Some(now);
            }
        }
        if self.last_timestamp_sent.is_none_or(|t| now - t >= self.timestamp_interval)
            && builder
                .add(&Chunk::Timestamp(TimestampChunk { timestamp: now.as_millis() }))
                .is_ok()
        {
            self.last_timestamp_sent = Some(now);
        }
        if let Some((timestamp, received)) = self.pending_timestamp_ack {
            // The echoed value is shifted by how long it was held here, so that it doesn't
            // count towards the round trip time.
            let held = (now - received).as_millis() as i64;
            let echo = TimestampAckChunk { timestamp: timestamp.saturating_add(held) };
            if builder.add(&Chunk::TimestampAck(echo)).is_ok() {
                self.pending_timestamp_ack = None;
            }
        }
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        freeze_params(&self.local, freezer);
        freeze_params(&self.peer, freezer);
        freeze_addr(&self.remote_addr, freezer);
        for tsn in &self.next_tsn {
            freezer.put_u32(tsn.0);
        }
        freezer.put_u32(self.peer_window);
        match &self.secret {
            Some(secret) => {
                freezer.put_bool(true);
                secret.freeze(freezer);
            }
            None => freezer.put_bool(false),
        }
        self.ack_manager.freeze(freezer);
        self.cancelled.freeze(freezer);
        for queue in self.queues() {
            queue.freeze(freezer);
        }
        self.receive_queue.freeze(freezer);
        self.rto.freeze(freezer);
    }

    /// Restores a block frozen by [`Self::freeze`]. All times restart at `now`.
    pub fn defrost(
        options: &Options,
        defroster: &mut dyn Defroster,
        now: MocketTime,
    ) -> Result<Self, DefrostError> {
        let local = defrost_params(defroster)?;
        let peer = defrost_params(defroster)?;
        let remote_addr = defrost_addr(defroster)?;
        let mut tcb = Self::new(options, local, peer, remote_addr, now);
        for tsn in tcb.next_tsn.iter_mut() {
            *tsn = Tsn(defroster.get_u32()?);
        }
        tcb.peer_window = defroster.get_u32()?;
        if defroster.get_bool()? {
            tcb.secret = Some(SessionSecret::defrost(defroster)?);
        }
        tcb.ack_manager = Arc::new(AckManager::defrost(options.bandwidth_estimation, defroster)?);
        tcb.cancelled = Arc::new(CancelledTsnManager::defrost(defroster)?);
        let mut queue = |flow| {
            UnacknowledgedPacketQueue::defrost(flow, options.detect_lost_packets, now, defroster)
                .map(Arc::new)
        };
        tcb.control_queue = queue(Flow::Control)?;
        tcb.reliable_sequenced_queue = queue(Flow::ReliableSequenced)?;
        tcb.reliable_unsequenced_queue = queue(Flow::ReliableUnsequenced)?;
        tcb.receive_queue = ReceiveQueue::defrost(defroster)?;
        tcb.rto.defrost(defroster)?;
        Ok(tcb)
    }
}

fn freeze_params(params: &InitParams, freezer: &mut dyn Freezer) {
    freezer.put_u32(params.validation);
    for flow in Flow::ALL {
        freezer.put_u32(params.initial_tsn(flow).0);
    }
}

fn defrost_params(defroster: &mut dyn Defroster) -> Result<InitParams, DefrostError> {
    let validation = defroster.get_u32()?;
    if !InitParams::is_valid_validation(validation) {
        return Err(DefrostError::InvalidValue);
    }
    let control_tsn = Tsn(defroster.get_u32()?);
    let rel_seq_tsn = Tsn(defroster.get_u32()?);
    let rel_unseq_id = Tsn(defroster.get_u32()?);
    let unrel_seq_tsn = Tsn(defroster.get_u32()?);
    let unrel_unseq_id = Tsn(defroster.get_u32()?);
    Ok(InitParams {
        validation,
        control_tsn,
        rel_seq_tsn,
        unrel_seq_tsn,
        rel_unseq_id,
        unrel_unseq_id,
    })
}

fn freeze_addr(addr: &SocketAddr, freezer: &mut dyn Freezer) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            freezer.put_u8(ADDR_V4);
            freezer.put_bytes_raw(&ip.octets());
        }
        IpAddr::V6(ip) => {
            freezer.put_u8(ADDR_V6);
            freezer.put_bytes_raw(&ip.octets());
        }
    }
    freezer.put_u16(addr.port());
}

fn defrost_addr(defroster: &mut dyn Defroster) -> Result<SocketAddr, DefrostError> {
    let ip = match defroster.get_u8()? {
        ADDR_V4 => {
            let b = defroster.get_bytes_raw(4)?;
            IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        ADDR_V6 => {
            let mut octets = [0; 16];
            octets.copy_from_slice(defroster.get_bytes_raw(16)?);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(DefrostError::InvalidValue),
    };
    Ok(SocketAddr::new(ip, defroster.get_u16()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Message;
    use crate::packet::mocket_packet::HEADER_SIZE;
    use crate::packet::mocket_packet::MocketPacket;
    use crate::tx::unacknowledged_packet_queue::OutstandingPacket;

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

    fn tcb() -> TransmissionControlBlock {
        TransmissionControlBlock::new(
            &Options::default(),
            params(11, 1000),
            params(22, 5000),
            "10.0.0.2:7000".parse().unwrap(),
            MocketTime::zero(),
        )
    }

    #[test]
    fn assigns_tsns_per_flow() {
        let mut tcb = tcb();
        assert_eq!(tcb.assign_tsn(Flow::Control), Tsn(1000));
        assert_eq!(tcb.assign_tsn(Flow::Control), Tsn(1001));
        assert_eq!(tcb.assign_tsn(Flow::ReliableSequenced), Tsn(1100));
        assert_eq!(tcb.assign_tsn(Flow::UnreliableUnsequenced), Tsn(1400));
        assert_eq!(
            tcb.delivery_prerequisites(),
            DeliveryPrerequisites {
                control: Tsn(1002),
                reliable_sequenced: Tsn(1101),
                unreliable_sequenced: Tsn(1200),
            }
        );
    }

    #[test]
    fn packets_carry_peer_validation() {
        let tcb = tcb();
        let mut builder = tcb.new_control_packet();
        let packet = MocketPacket::from_bytes(&builder.build()).unwrap();
        assert_eq!(packet.header.validation, 22);
        assert_eq!(packet.header.flow(), Flow::UnreliableUnsequenced);
        assert_eq!(packet.header.window_size, Options::default().max_window_size);
    }

    #[test]
    fn window_allows_first_packet_when_empty() {
        let mut tcb = tcb();
        tcb.peer_window = 10;
        assert!(tcb.window_allows(1000));

        tcb.control_queue.lock().insert(OutstandingPacket::new(
            Tsn(1000),
            vec![0; 8],
            MocketTime::zero(),
            Duration::from_millis(100),
        ));
        assert!(tcb.window_allows(2));
        assert!(!tcb.window_allows(3));
        assert!(!tcb.is_flushed());
        assert_eq!(tcb.unack_bytes(), 8);
        assert_eq!(tcb.unack_packets(), 1);
    }

    #[test]
    fn window_shrinks_with_buffered_messages() {
        let mut tcb = tcb();
        let full = tcb.window_size();
        tcb.receive_queue.add(
            Tsn(5400),
            None,
            Message::new(Flow::UnreliableUnsequenced, 1, vec![0; 100]),
        );
        assert_eq!(tcb.window_size(), full - 100);
    }

    #[test]
    fn piggybacks_timestamp_once_per_interval() {
        let mut tcb = tcb();
        let interval = Duration::from_secs(1);
        let now = MocketTime::zero();

        let mut builder = tcb.new_control_packet();
        tcb.add_piggyback(&mut builder, now, interval);
        let packet = MocketPacket::from_bytes(&builder.build()).unwrap();
        assert!(matches!(packet.chunks[..], [Chunk::Timestamp(_)]));

        let mut builder = tcb.new_control_packet();
        tcb.add_piggyback(&mut builder, now + Duration::from_millis(10), interval);
        assert!(builder.is_empty());
    }

    #[test]
    fn echoes_timestamp_with_hold_time() {
        let mut tcb = tcb();
        tcb.last_timestamp_sent = Some(MocketTime::zero());
        tcb.pending_timestamp_ack = Some((500, MocketTime::zero() + Duration::from_millis(20)));

        let mut builder = tcb.new_control_packet();
        tcb.add_piggyback(
            &mut builder,
            MocketTime::zero() + Duration::from_millis(50),
            Duration::from_secs(1),
        );
        let packet = MocketPacket::from_bytes(&builder.build()).unwrap();
        match &packet.chunks[..] {
            [Chunk::TimestampAck(ack)] => assert_eq!(ack.timestamp, 530),
            chunks => panic!("unexpected chunks: {chunks:?}"),
        }
        assert!(tcb.pending_timestamp_ack.is_none());
    }

    #[test]
    fn sack_that_does_not_fit_stays_pending() {
        let mut tcb = tcb();
        tcb.last_timestamp_sent = Some(MocketTime::zero());
        tcb.ack_manager.received_packet(MocketTime::zero(), Flow::Control, Tsn(5000), 10);

        let mut builder = PacketBuilder::new(PacketHeader::new(22, 0), HEADER_SIZE + 4);
        tcb.add_piggyback(&mut builder, MocketTime::zero(), Duration::from_secs(1));
        assert!(builder.is_empty());
        assert!(tcb.ack_manager.has_pending_ack());
        assert_eq!(tcb.last_sack_sent, None);

        let now = MocketTime::zero() + Duration::from_millis(3);
        let mut builder = tcb.new_control_packet();
        tcb.add_piggyback(&mut builder, now, Duration::from_secs(1));
        let packet = MocketPacket::from_bytes(&builder.build()).unwrap();
        assert!(matches!(packet.chunks[..], [Chunk::Sack(_)]));
        assert!(!tcb.ack_manager.has_pending_ack());
        assert_eq!(tcb.last_sack_sent, Some(now));
    }

    #[test]
    fn sack_is_not_held_back_by_a_steady_stream_of_packets() {
        let mut tcb = tcb();
        tcb.last_timestamp_sent = Some(MocketTime::zero());
        let delay = Duration::from_millis(5);
        let at = |ms| MocketTime::zero() + Duration::from_millis(ms);

        assert_eq!(tcb.sack_deadline(delay), None);
        tcb.ack_manager.received_packet(at(0), Flow::Control, Tsn(5000), 10);
        assert_eq!(tcb.sack_deadline(delay), Some(at(5)));

        let mut builder = tcb.new_control_packet();
        tcb.add_piggyback(&mut builder, at(5), Duration::from_secs(1));
        assert_eq!(tcb.sack_deadline(delay), None);

        // Every arrival would push a plain delayed SACK back by another 5 ms.
        for (ms, tsn) in [(7, 5001), (9, 5002), (11, 5003)] {
            tcb.ack_manager.received_packet(at(ms), Flow::Control, Tsn(tsn), 10);
            assert_eq!(tcb.sack_deadline(delay), Some(at(10)));
        }
    }

    #[test]
    fn freeze_and_defrost() {
        let mut tcb = tcb();
        tcb.assign_tsn(Flow::ReliableSequenced);
        tcb.peer_window = 4096;
        tcb.secret = Some(SessionSecret { uuid: 77, password: b"hunter22".to_vec() });
        tcb.ack_manager.received_packet(MocketTime::zero(), Flow::Control, Tsn(5000), 10);
        tcb.reliable_sequenced_queue.lock().insert(OutstandingPacket::new(
            Tsn(1100),
            vec![1, 2, 3],
            MocketTime::zero(),
            Duration::from_millis(100),
        ));

        let mut frozen: Vec<u8> = Vec::new();
        tcb.freeze(&mut frozen);

        let now = MocketTime::zero() + Duration::from_secs(3600);
        let mut input: &[u8] = &frozen;
        let restored = TransmissionControlBlock::defrost(&Options::default(), &mut input, now)
            .unwrap();
        assert!(input.is_empty());
        assert_eq!(restored.local, tcb.local);
        assert_eq!(restored.peer, tcb.peer);
        assert_eq!(restored.remote_addr, tcb.remote_addr);
        assert_eq!(restored.next_tsn(Flow::ReliableSequenced), Tsn(1101));
        assert_eq!(restored.peer_window, 4096);
        assert_eq!(restored.secret, tcb.secret);
        assert_eq!(restored.ack_manager.cumulative_tsn(Flow::Control), Some(Tsn(5000)));
        assert_eq!(restored.unack_packets(), 1);
        assert_eq!(restored.last_received, now);
    }

    #[test]
    fn defrost_truncated_fails() {
        let tcb = tcb();
        let mut frozen: Vec<u8> = Vec::new();
        tcb.freeze(&mut frozen);
        frozen.truncate(frozen.len() - 1);
        let mut input: &[u8] = &frozen;
        assert!(
            TransmissionControlBlock::defrost(&Options::default(), &mut input, MocketTime::zero())
                .is_err()
        );
    }

    #[test]
    fn ipv6_address_survives_freeze() {
        let addr: SocketAddr = "[2001:db8::1]:4433".parse().unwrap();
        let mut frozen: Vec<u8> = Vec::new();
        freeze_addr(&addr, &mut frozen);
        let mut input: &[u8] = &frozen;
        assert_eq!(defrost_addr(&mut input).unwrap(), addr);
    }
}
