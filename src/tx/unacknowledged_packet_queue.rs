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
use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use crate::packet::mocket_packet::MocketPacket;
use crate::packet::mocket_packet::peek_data_tag;
use crate::tx::cancelled_tsn_manager::CancelledTsnManager;
use crate::types::Flow;
use crate::types::Tsn;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

/// A reliable packet that has been sent, and not yet acknowledged.
#[derive(Debug)]
pub struct OutstandingPacket {
    pub tsn: Tsn,

    /// The application tag, used for cancelling.
    pub tag: u16,

    /// The serialized packet, excluding piggyback chunks.
    pub data: Vec<u8>,

    /// When the packet was last sent, or retransmitted.
    pub last_io: MocketTime,

    /// How long after `last_io` the packet is retransmitted. Zero when it's believed to be lost.
    pub rto: Duration,

    pub retransmit_count: u32,

    send_order: u64,
}

impl OutstandingPacket {
    pub fn new(tsn: Tsn, data: Vec<u8>, now: MocketTime, rto: Duration) -> Self {
        let tag = peek_data_tag(&data).unwrap_or(0);
        Self { tsn, tag, data, last_io: now, rto, retransmit_count: 0, send_order: 0 }
    }

    pub fn deadline(&self) -> MocketTime {
        self.last_io + self.rto
    }
}

/// The outcome of acknowledging packets.
#[derive(Debug, Default, PartialEq)]
pub struct Acked {
    pub packets: usize,
    pub bytes: usize,
}

impl std::ops::AddAssign for Acked {
    fn add_assign(&mut self, rhs: Self) {
        self.packets += rhs.packets;
        self.bytes += rhs.bytes;
    }
}

/// Unacknowledged packets of one reliable flow, reachable in three orders at once:
///  * by TSN, for cumulative and range acknowledgements,
///  * by retransmission deadline (ties broken by TSN), to find the next packet to retransmit,
///  * by the time the packet was last sent, to detect lost packets.
///
/// The packets are stored in an arena, and each ordering refers to them by slot index.
pub struct OutstandingPackets {
    detect_lost_packets: bool,
    slots: Vec<Option<OutstandingPacket>>,
    free_slots: Vec<usize>,
    by_tsn: BTreeMap<Tsn, usize>,
    by_deadline: BTreeSet<(MocketTime, Tsn, usize)>,
    by_send_order: BTreeMap<u64, usize>,
    next_send_order: u64,
    bytes_in_queue: usize,
    bytes_acked: u64,
    min_ack_time: Option<Duration>,
}

impl OutstandingPackets {
    fn new(detect_lost_packets: bool) -> Self {
        Self {
            detect_lost_packets,
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_tsn: BTreeMap::new(),
            by_deadline: BTreeSet::new(),
            by_send_order: BTreeMap::new(),
            next_send_order: 0,
            bytes_in_queue: 0,
            bytes_acked: 0,
            min_ack_time: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_tsn.is_empty()
    }

    pub fn packet_count(&self) -> usize {
        self.by_tsn.len()
    }

    /// Bytes in all packets in the queue.
    pub fn bytes_in_queue(&self) -> usize {
        self.bytes_in_queue
    }

    /// Bytes acknowledged since the queue was created.
    pub fn bytes_acked(&self) -> u64 {
        self.bytes_acked
    }

    /// The shortest time from sending a packet until it was acknowledged, among packets that
    /// were never retransmitted, since the last reset.
    pub fn min_ack_time(&self) -> Option<Duration> {
        self.min_ack_time
    }

    pub fn reset_min_ack_time(&mut self) {
        self.min_ack_time = None;
    }

    fn packet(&self, slot: usize) -> &OutstandingPacket {
        self.slots[slot].as_ref().expect("slot referenced by an ordering is occupied")
    }

    fn packet_mut(&mut self, slot: usize) -> &mut OutstandingPacket {
        self.slots[slot].as_mut().expect("slot referenced by an ordering is occupied")
    }

    /// Adds a packet that has just been sent. Returns `false` if its deadline can't be
    /// represented, or if a packet with the same TSN is already in the queue.
    pub fn insert(&mut self, mut packet: OutstandingPacket) -> bool {
        if Duration::from(packet.last_io).checked_add(packet.rto).is_none()
            || self.by_tsn.contains_key(&packet.tsn)
        {
            return false;
        }
        packet.send_order = self.next_send_order;
        self.next_send_order += 1;
        self.bytes_in_queue += packet.data.len();

        let (deadline, tsn, send_order) = (packet.deadline(), packet.tsn, packet.send_order);
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(packet);
                slot
            }
            None => {
                self.slots.push(Some(packet));
                self.slots.len() - 1
            }
        };
        self.by_tsn.insert(tsn, slot);
        self.by_deadline.insert((deadline, tsn, slot));
        self.by_send_order.insert(send_order, slot);
        true
    }

    fn remove(&mut self, slot: usize) -> Option<OutstandingPacket> {
        let packet = self.slots[slot].take()?;
        self.free_slots.push(slot);
        self.by_tsn.remove(&packet.tsn);
        self.by_deadline.remove(&(packet.deadline(), packet.tsn, slot));
        self.by_send_order.remove(&packet.send_order);
        self.bytes_in_queue -= packet.data.len();
        Some(packet)
    }

    /// Changes the deadline of the packet in `slot`, keeping the deadline ordering in sync.
    fn update(&mut self, slot: usize, f: impl FnOnce(&mut OutstandingPacket)) {
        let packet = self.packet(slot);
        let old_key = (packet.deadline(), packet.tsn, slot);
        self.by_deadline.remove(&old_key);
        let packet = self.packet_mut(slot);
        f(packet);
        let new_key = (packet.deadline(), packet.tsn, slot);
        self.by_deadline.insert(new_key);
    }

    fn acknowledge(&mut self, slot: usize, now: MocketTime) -> usize {
        if self.detect_lost_packets {
            self.expire_sent_before(slot);
        }
        let Some(packet) = self.remove(slot) else { return 0 };
        if packet.retransmit_count == 0 {
            let ack_time = now - packet.last_io;
            if self.min_ack_time.is_none_or(|t| ack_time < t) {
                self.min_ack_time = Some(ack_time);
            }
        }
        self.bytes_acked += packet.data.len() as u64;
        packet.data.len()
    }

    /// Packets sent before the one in `slot` that are still outstanding are assumed to be lost,
    /// and are made due for retransmission.
    fn expire_sent_before(&mut self, slot: usize) {
        let send_order = self.packet(slot).send_order;
        let earlier: Vec<usize> =
            self.by_send_order.range(..send_order).map(|(_, &slot)| slot).collect();
        for earlier_slot in earlier {
            if !self.packet(earlier_slot).rto.is_zero() {
                self.update(earlier_slot, |p| p.rto = Duration::ZERO);
            }
        }
    }

    /// Removes all packets with a TSN less than or equal to `tsn`.
    pub fn acknowledge_up_to(&mut self, tsn: Tsn, now: MocketTime) -> Acked {
        let mut acked = Acked::default();
        while let Some((&first, &slot)) = self.by_tsn.first_key_value() {
            if first > tsn {
                break;
            }
            acked += Acked { packets: 1, bytes: self.acknowledge(slot, now) };
        }
        acked
    }

    /// Removes all packets with a TSN in `[begin, end]`.
    pub fn acknowledge_range(&mut self, begin: Tsn, end: Tsn, now: MocketTime) -> Acked {
        if end < begin {
            return Acked::default();
        }
        let slots: Vec<usize> = self.by_tsn.range(begin..=end).map(|(_, &slot)| slot).collect();
        let mut acked = Acked::default();
        for slot in slots {
            acked += Acked { packets: 1, bytes: self.acknowledge(slot, now) };
        }
        acked
    }

    /// Returns the packet that is due for retransmission first, if its deadline has passed.
    pub fn next_timed_out_packet(&self, now: MocketTime) -> Option<&OutstandingPacket> {
        let &(deadline, _, slot) = self.by_deadline.first()?;
        if deadline <= now { Some(self.packet(slot)) } else { None }
    }

    /// The earliest retransmission deadline.
    pub fn next_deadline(&self) -> Option<MocketTime> {
        self.by_deadline.first().map(|&(deadline, _, _)| deadline)
    }

    /// Records that the packet `tsn` has been retransmitted at `now`, and is next due after
    /// `rto`.
    pub fn packet_retransmitted(&mut self, tsn: Tsn, now: MocketTime, rto: Duration) -> bool {
        let Some(&slot) = self.by_tsn.get(&tsn) else { return false };
        let old_order = self.packet(slot).send_order;
        self.by_send_order.remove(&old_order);
        let send_order = self.next_send_order;
        self.next_send_order += 1;
        self.by_send_order.insert(send_order, slot);
        self.update(slot, |p| {
            p.last_io = now;
            p.rto = rto;
            p.retransmit_count += 1;
            p.send_order = send_order;
        });
        true
    }

    /// Makes the packet `tsn` due for retransmission, unless it has already been retransmitted.
    pub fn prioritize_retransmission_of(&mut self, tsn: Tsn) -> bool {
        let Some(&slot) = self.by_tsn.get(&tsn) else { return false };
        if self.packet(slot).retransmit_count != 0 {
            return false;
        }
        self.update(slot, |p| p.rto = Duration::ZERO);
        true
    }

    /// Makes all packets with a TSN less than `tsn` that haven't been retransmitted due for
    /// retransmission. Returns how many were affected.
    pub fn prioritize_retransmission_up_to(&mut self, tsn: Tsn) -> usize {
        let slots: Vec<usize> = self
            .by_tsn
            .iter()
            .take_while(|(t, _)| **t < tsn)
            .map(|(_, &slot)| slot)
            .filter(|&slot| self.packet(slot).retransmit_count == 0)
            .collect();
        for &slot in &slots {
            self.update(slot, |p| p.rto = Duration::ZERO);
        }
        slots.len()
    }

    /// Removes the packet that is due for retransmission first.
    pub fn delete_next_in_retransmit_order(&mut self) -> Option<OutstandingPacket> {
        let &(_, _, slot) = self.by_deadline.first()?;
        self.remove(slot)
    }

    /// Gives every packet the same `rto`, and forgets how many times they were retransmitted.
    pub fn reset_retransmit_timeouts(&mut self, rto: Duration) {
        let slots: Vec<usize> = self.by_tsn.values().copied().collect();
        for slot in slots {
            self.update(slot, |p| {
                p.rto = rto;
                p.retransmit_count = 0;
            });
        }
    }

    /// Removes all packets with `tag`, and reports them as cancelled. Returns how many were
    /// removed.
    pub fn cancel(
        &mut self,
        flow: Flow,
        tag: u16,
        now: MocketTime,
        cancelled: &CancelledTsnManager,
    ) -> usize {
        let slots: Vec<usize> = self
            .by_tsn
            .values()
            .copied()
            .filter(|&slot| self.packet(slot).tag == tag)
            .collect();
        let mut batch = cancelled.start(flow, now);
        for &slot in &slots {
            if let Some(packet) = self.remove(slot) {
                batch.add(packet.tsn);
            }
        }
        batch.end();
        slots.len()
    }

    /// TSNs in the queue, in TSN order.
    pub fn tsns(&self) -> impl Iterator<Item = Tsn> + '_ {
        self.by_tsn.keys().copied()
    }

    /// Writes the packets in retransmission order. Times are not frozen, as they are relative
    /// to the connection that is frozen.
    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        freezer.put_u32(self.by_deadline.len() as u32);
        for &(_, _, slot) in &self.by_deadline {
            let packet = self.packet(slot);
            freezer.put_u32(packet.tsn.0);
            freezer.put_u64(packet.rto.as_millis() as u64);
            freezer.put_u32(packet.retransmit_count);
            freezer.put_bytes(&packet.data);
        }
    }

    /// Restores packets of `flow` as if they were all sent at `now`. Packets that aren't
    /// well-formed packets of `flow` with the frozen TSN are rejected.
    fn defrost_into(
        &mut self,
        flow: Flow,
        defroster: &mut dyn Defroster,
        now: MocketTime,
    ) -> Result<(), DefrostError> {
        let count = defroster.get_u32()?;
        for _ in 0..count {
            let tsn = Tsn(defroster.get_u32()?);
            let rto = Duration::from_millis(defroster.get_u64()?);
            let retransmit_count = defroster.get_u32()?;
            let data = defroster.get_bytes()?;
            match MocketPacket::from_bytes(&data) {
                Ok(p) if p.header.flow() == flow && p.header.sequence_number == tsn => {}
                _ => return Err(DefrostError::InvalidValue),
            }
            let mut packet = OutstandingPacket::new(tsn, data, now, rto);
            packet.retransmit_count = retransmit_count;
            if !self.insert(packet) {
                return Err(DefrostError::InvalidValue);
            }
        }
        Ok(())
    }
}

/// The shared, lockable, queue of unacknowledged packets of one flow.
///
/// Every operation is done on the guard returned by [`UnacknowledgedPacketQueue::lock`], which
/// allows sequences such as finding a timed out packet, retransmitting it and updating its
/// deadline to be done atomically.
pub struct UnacknowledgedPacketQueue {
    packets: Mutex<OutstandingPackets>,
}

impl UnacknowledgedPacketQueue {
    pub fn new(flow: Flow, detect_lost_packets: bool) -> Self {
        debug_assert!(flow.is_reliable());
        Self { packets: Mutex::new(OutstandingPackets::new(detect_lost_packets)) }
    }

    pub fn lock(&self) -> MutexGuard<'_, OutstandingPackets> {
        self.packets.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        self.lock().freeze(freezer);
    }

    pub fn defrost(
        flow: Flow,
        detect_lost_packets: bool,
        now: MocketTime,
        defroster: &mut dyn Defroster,
    ) -> Result<Self, DefrostError> {
        let queue = Self::new(flow, detect_lost_packets);
        queue.lock().defrost_into(flow, defroster, now)?;
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::chunk::Chunk;
    use crate::packet::data_chunk::DataChunk;
    use crate::packet::mocket_packet::PacketBuilder;
    use crate::packet::mocket_packet::PacketHeader;
    use rand::seq::SliceRandom;

    const RTO: Duration = Duration::from_millis(100);

    fn t(ms: u64) -> MocketTime {
        MocketTime::from(Duration::from_millis(ms))
    }

    fn packet(tsn: u32, tag: u16, now: MocketTime) -> OutstandingPacket {
        let header = PacketHeader::for_flow(Flow::ReliableSequenced, Tsn(tsn), 1, 0);
        let mut builder = PacketBuilder::new(header, 1000);
        builder.add(&Chunk::Data(DataChunk { tag, payload: vec![0; 10] })).unwrap();
        OutstandingPacket::new(Tsn(tsn), builder.bytes_without_piggyback(), now, RTO)
    }

    fn queue_with(tsns: &[u32], detect_lost_packets: bool) -> UnacknowledgedPacketQueue {
        let queue = UnacknowledgedPacketQueue::new(Flow::ReliableSequenced, detect_lost_packets);
        {
            let mut q = queue.lock();
            for (i, &tsn) in tsns.iter().enumerate() {
                assert!(q.insert(packet(tsn, 0, t(i as u64))));
            }
        }
        queue
    }

    #[test]
    fn empty_queue() {
        let queue = UnacknowledgedPacketQueue::new(Flow::Control, false);
        let q = queue.lock();
        assert!(q.is_empty());
        assert_eq!(q.packet_count(), 0);
        assert!(q.next_timed_out_packet(t(1_000_000)).is_none());
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn tag_is_read_from_data_chunk() {
        let p = packet(1, 42, t(0));
        assert_eq!(p.tag, 42);
        assert_eq!(p.deadline(), t(100));
    }

    #[test]
    fn times_out_at_send_plus_rto_not_before() {
        let queue = queue_with(&[10], false);
        let q = queue.lock();
        assert!(q.next_timed_out_packet(t(99)).is_none());
        assert_eq!(q.next_timed_out_packet(t(100)).map(|p| p.tsn), Some(Tsn(10)));
        assert_eq!(q.next_deadline(), Some(t(100)));
    }

    #[test]
    fn cumulative_ack_removes_up_to() {
        let queue = queue_with(&[10, 11, 12, 13], false);
        let mut q = queue.lock();
        let size = q.bytes_in_queue() / 4;
        let acked = q.acknowledge_up_to(Tsn(11), t(50));
        assert_eq!(acked, Acked { packets: 2, bytes: 2 * size });
        assert_eq!(q.tsns().collect::<Vec<_>>(), vec![Tsn(12), Tsn(13)]);
        assert_eq!(q.bytes_in_queue(), 2 * size);
        assert_eq!(q.bytes_acked(), 2 * size as u64);

        // Redundant acks are no-ops.
        assert_eq!(q.acknowledge_up_to(Tsn(11), t(50)), Acked::default());
    }

    #[test]
    fn range_ack_keeps_orderings_consistent() {
        let queue = queue_with(&[10, 11, 12, 13, 14, 15], false);
        let mut q = queue.lock();
        assert_eq!(q.acknowledge_range(Tsn(12), Tsn(13), t(50)).packets, 2);
        assert_eq!(q.acknowledge_range(Tsn(15), Tsn(15), t(50)).packets, 1);
        assert_eq!(q.acknowledge_range(Tsn(20), Tsn(30), t(50)).packets, 0);
        assert_eq!(q.tsns().collect::<Vec<_>>(), vec![Tsn(10), Tsn(11), Tsn(14)]);
        assert_eq!(q.packet_count(), 3);

        let mut removed = Vec::new();
        while let Some(p) = q.delete_next_in_retransmit_order() {
            removed.push(p.tsn);
        }
        assert_eq!(removed, vec![Tsn(10), Tsn(11), Tsn(14)]);
        assert!(q.is_empty());
        assert_eq!(q.bytes_in_queue(), 0);
    }

    #[test]
    fn retransmitted_packet_moves_to_back() {
        let queue = queue_with(&[10, 11], false);
        let mut q = queue.lock();
        assert_eq!(q.next_timed_out_packet(t(200)).map(|p| p.tsn), Some(Tsn(10)));
        assert!(q.packet_retransmitted(Tsn(10), t(200), RTO * 2));
        assert_eq!(q.next_timed_out_packet(t(200)).map(|p| p.tsn), Some(Tsn(11)));
        assert!(q.packet_retransmitted(Tsn(11), t(200), RTO * 2));
        assert!(q.next_timed_out_packet(t(399)).is_none());
        assert_eq!(q.next_timed_out_packet(t(400)).map(|p| p.retransmit_count), Some(1));
    }

    #[test]
    fn min_ack_time_ignores_retransmitted_packets() {
        let queue = queue_with(&[10, 11], false);
        let mut q = queue.lock();
        assert!(q.packet_retransmitted(Tsn(10), t(150), RTO));
        q.acknowledge_up_to(Tsn(10), t(155));
        assert_eq!(q.min_ack_time(), None);
        q.acknowledge_up_to(Tsn(11), t(31));
        assert_eq!(q.min_ack_time(), Some(Duration::from_millis(30)));
        q.reset_min_ack_time();
        assert_eq!(q.min_ack_time(), None);
    }

    #[test]
    fn lost_packets_are_expired_when_later_packet_is_acked() {
        let queue = queue_with(&[10, 11, 12], true);
        let mut q = queue.lock();
        assert!(q.next_timed_out_packet(t(5)).is_none());
        q.acknowledge_range(Tsn(12), Tsn(12), t(5));
        assert_eq!(q.next_timed_out_packet(t(5)).map(|p| p.tsn), Some(Tsn(10)));
        assert!(q.packet_retransmitted(Tsn(10), t(5), RTO));
        assert_eq!(q.next_timed_out_packet(t(5)).map(|p| p.tsn), Some(Tsn(11)));
    }

    #[test]
    fn lost_packets_are_not_expired_by_default() {
        let queue = queue_with(&[10, 11, 12], false);
        let mut q = queue.lock();
        q.acknowledge_range(Tsn(12), Tsn(12), t(5));
        assert!(q.next_timed_out_packet(t(5)).is_none());
    }

    #[test]
    fn prioritize_retransmission() {
        let queue = queue_with(&[10, 11, 12], false);
        let mut q = queue.lock();
        assert!(q.prioritize_retransmission_of(Tsn(11)));
        assert_eq!(q.next_timed_out_packet(t(2)).map(|p| p.tsn), Some(Tsn(11)));
        assert!(!q.prioritize_retransmission_of(Tsn(99)));

        assert!(q.packet_retransmitted(Tsn(11), t(2), RTO));
        assert!(!q.prioritize_retransmission_of(Tsn(11)));
        assert_eq!(q.prioritize_retransmission_up_to(Tsn(12)), 1);
        assert_eq!(q.next_timed_out_packet(t(2)).map(|p| p.tsn), Some(Tsn(10)));
    }

    #[test]
    fn reset_retransmit_timeouts() {
        let queue = queue_with(&[10, 11], false);
        let mut q = queue.lock();
        assert!(q.packet_retransmitted(Tsn(10), t(100), RTO * 4));
        q.reset_retransmit_timeouts(Duration::from_millis(10));
        assert_eq!(q.next_timed_out_packet(t(11)).map(|p| p.tsn), Some(Tsn(11)));
        assert!(q.delete_next_in_retransmit_order().is_some());
        let p = q.next_timed_out_packet(t(110)).unwrap();
        assert_eq!((p.tsn, p.retransmit_count), (Tsn(10), 0));
    }

    #[test]
    fn cancel_by_tag_reports_cancelled_tsns() {
        let queue = UnacknowledgedPacketQueue::new(Flow::ReliableSequenced, false);
        let cancelled = CancelledTsnManager::new();
        let mut q = queue.lock();
        for (tsn, tag) in [(10, 1), (11, 2), (12, 1)] {
            assert!(q.insert(packet(tsn, tag, t(0))));
        }
        assert_eq!(q.cancel(Flow::ReliableSequenced, 1, t(0), &cancelled), 2);
        assert_eq!(q.tsns().collect::<Vec<_>>(), vec![Tsn(11)]);
        assert!(cancelled.have_information());
        assert_eq!(q.cancel(Flow::ReliableSequenced, 7, t(0), &cancelled), 0);
    }

    #[test]
    fn insert_rejects_overflowing_deadline_and_duplicates() {
        let queue = UnacknowledgedPacketQueue::new(Flow::ReliableSequenced, false);
        let mut q = queue.lock();
        let mut p = packet(1, 0, MocketTime::infinite_future());
        p.rto = Duration::from_millis(1);
        assert!(!q.insert(p));
        assert!(q.insert(packet(2, 0, t(0))));
        assert!(!q.insert(packet(2, 0, t(0))));
        assert_eq!(q.packet_count(), 1);
    }

    #[test]
    fn slots_are_reused() {
        let queue = queue_with(&[1, 2, 3], false);
        let mut q = queue.lock();
        q.acknowledge_up_to(Tsn(3), t(10));
        for tsn in 4..=6 {
            assert!(q.insert(packet(tsn, 0, t(10))));
        }
        assert_eq!(q.slots.len(), 3);
        assert_eq!(q.packet_count(), 3);
    }

    #[test]
    fn freeze_and_defrost() {
        let queue = queue_with(&[10, 11, 12], false);
        queue.lock().packet_retransmitted(Tsn(10), t(50), RTO * 2);

        let mut frozen: Vec<u8> = Vec::new();
        queue.freeze(&mut frozen);
        let mut defroster: &[u8] = &frozen;
        let defrosted = UnacknowledgedPacketQueue::defrost(
            Flow::ReliableSequenced,
            false,
            t(1000),
            &mut defroster,
        )
        .unwrap();
        assert!(defroster.is_empty());

        let mut q = defrosted.lock();
        assert_eq!(q.tsns().collect::<Vec<_>>(), vec![Tsn(10), Tsn(11), Tsn(12)]);
        assert_eq!(q.bytes_in_queue(), queue.lock().bytes_in_queue());
        assert!(q.next_timed_out_packet(t(1099)).is_none());
        assert_eq!(q.next_timed_out_packet(t(1100)).map(|p| p.tsn), Some(Tsn(11)));
        let first = q.delete_next_in_retransmit_order().unwrap();
        assert_eq!(first.tsn, Tsn(11));
    }

    #[test]
    fn range_ack_in_any_insertion_order_across_wraparound() {
        let base = 0xFFFF_FFF0_u32;
        let tsns: Vec<u32> = (0..32).map(|i| base.wrapping_add(i)).collect();
        let is_acked = |tsn: u32| (12..=19).contains(&tsn.wrapping_sub(base));
        for _ in 0..200 {
            let mut order = tsns.clone();
            order.shuffle(&mut rand::rng());
            let queue = UnacknowledgedPacketQueue::new(Flow::ReliableSequenced, false);
            let mut q = queue.lock();
            for (i, &tsn) in order.iter().enumerate() {
                assert!(q.insert(packet(tsn, 0, t(i as u64))));
            }

            // 0xFFFFFFFC..=0x3
            let acked =
                q.acknowledge_range(Tsn(base.wrapping_add(12)), Tsn(base.wrapping_add(19)), t(99));
            assert_eq!(acked.packets, 8);
            let remaining: Vec<Tsn> =
                tsns.iter().filter(|&&tsn| !is_acked(tsn)).map(|&tsn| Tsn(tsn)).collect();
            assert_eq!(q.tsns().collect::<Vec<_>>(), remaining);
            assert_eq!(q.packet_count(), 24);

            let mut removed = Vec::new();
            while let Some(p) = q.delete_next_in_retransmit_order() {
                removed.push(p.tsn);
            }
            let sent_order: Vec<Tsn> =
                order.iter().filter(|&&tsn| !is_acked(tsn)).map(|&tsn| Tsn(tsn)).collect();
            assert_eq!(removed, sent_order);
            assert_eq!(q.bytes_in_queue(), 0);
        }
    }

    #[test]
    fn defrost_rejects_malformed_packets() {
        let defrost = |tsn: u32, data: &[u8]| {
            let mut frozen: Vec<u8> = Vec::new();
            frozen.put_u32(1);
            frozen.put_u32(tsn);
            frozen.put_u64(100);
            frozen.put_u32(0);
            frozen.put_bytes(data);
            let mut defroster: &[u8] = &frozen;
            UnacknowledgedPacketQueue::defrost(Flow::ReliableSequenced, false, t(0), &mut defroster)
                .map(|q| q.lock().packet_count())
        };

        assert_eq!(defrost(10, &[1, 2, 3]), Err(DefrostError::InvalidValue));
        let valid = packet(10, 0, t(0)).data;
        assert_eq!(defrost(11, &valid), Err(DefrostError::InvalidValue));
        let control = PacketHeader::for_flow(Flow::Control, Tsn(10), 1, 0);
        let mut builder = PacketBuilder::new(control, 1000);
        builder.add(&Chunk::Data(DataChunk { tag: 0, payload: vec![1] })).unwrap();
        assert_eq!(
            defrost(10, &builder.bytes_without_piggyback()),
            Err(DefrostError::InvalidValue)
        );
        assert_eq!(defrost(10, &valid), Ok(1));
    }
}
