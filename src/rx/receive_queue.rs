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

use crate::api::Fragment;
use crate::api::Message;
use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use crate::packet::init_chunk::InitParams;
use crate::packet::mocket_packet::DeliveryPrerequisites;
use crate::packet::mocket_packet::PacketHeader;
use crate::rx::range_handler::ReceivedRangeHandler;
use crate::types::Flow;
use crate::types::Tsn;
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// A packet waiting in a sequenced flow for its turn. Packets that the sender has cancelled
/// hold their place without a message.
struct Pending {
    prerequisites: Option<DeliveryPrerequisites>,
    message: Option<Message>,
}

struct SequencedBuffer {
    next_expected: Tsn,
    pending: BTreeMap<Tsn, Pending>,
}

impl SequencedBuffer {
    fn new(next_expected: Tsn) -> Self {
        Self { next_expected, pending: BTreeMap::new() }
    }

    fn accepts(&self, tsn: Tsn) -> bool {
        !self.has_received(tsn)
    }

    fn has_received(&self, tsn: Tsn) -> bool {
        tsn < self.next_expected || self.pending.contains_key(&tsn)
    }

    fn freeze(&self, freezer: &mut dyn Freezer) {
        freezer.put_u32(self.next_expected.0);
        freezer.put_u32(self.pending.len() as u32);
        for (tsn, pending) in &self.pending {
            freezer.put_u32(tsn.0);
            match &pending.prerequisites {
                Some(p) => {
                    freezer.put_bool(true);
                    freezer.put_u32(p.control.0);
                    freezer.put_u32(p.reliable_sequenced.0);
                    freezer.put_u32(p.unreliable_sequenced.0);
                }
                None => freezer.put_bool(false),
            }
            match &pending.message {
                Some(message) => {
                    freezer.put_bool(true);
                    freeze_message(message, freezer);
                }
                None => freezer.put_bool(false),
            }
        }
    }

    fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        let mut buffer = Self::new(Tsn(defroster.get_u32()?));
        let count = defroster.get_u32()?;
        for _ in 0..count {
            let tsn = Tsn(defroster.get_u32()?);
            let prerequisites = if defroster.get_bool()? {
                Some(DeliveryPrerequisites {
                    control: Tsn(defroster.get_u32()?),
                    reliable_sequenced: Tsn(defroster.get_u32()?),
                    unreliable_sequenced: Tsn(defroster.get_u32()?),
                })
            } else {
                None
            };
            let message =
                if defroster.get_bool()? { Some(defrost_message(defroster)?) } else { None };
            if !buffer.accepts(tsn) {
                return Err(DefrostError::InvalidValue);
            }
            buffer.pending.insert(tsn, Pending { prerequisites, message });
        }
        Ok(buffer)
    }
}

fn freeze_message(message: &Message, freezer: &mut dyn Freezer) {
    let mut header = PacketHeader::new(0, 0);
    header.set_fragment(message.fragment);
    freezer.put_u8(message.flow.code());
    freezer.put_u16(message.tag);
    freezer.put_u16(header.flags);
    freezer.put_bytes(&message.payload);
}

fn defrost_message(defroster: &mut dyn Defroster) -> Result<Message, DefrostError> {
    let flow = Flow::from_code(defroster.get_u8()?).ok_or(DefrostError::InvalidValue)?;
    let tag = defroster.get_u16()?;
    let mut header = PacketHeader::new(0, 0);
    header.flags = defroster.get_u16()?;
    let fragment: Fragment = header.fragment();
    let payload = defroster.get_bytes()?;
    Ok(Message { flow, tag, fragment, payload })
}

/// Orders received messages for delivery to the application.
///
/// Each flow has its own delivery rules:
///  * The control and reliable sequenced flows deliver messages strictly in TSN order, and
///    buffer messages that arrive ahead of a gap.
///  * The reliable unsequenced flow delivers messages as they arrive, discarding duplicates.
///  * The unreliable sequenced flow delivers a message only if nothing newer has been delivered
///    before it, and never waits for missing ones.
///  * The unreliable unsequenced flow delivers everything it receives.
///
/// A sequenced message may also carry delivery prerequisites, which hold it back until the
/// other sequenced flows have caught up to the given TSNs.
pub struct ReceiveQueue {
    control: SequencedBuffer,
    reliable_sequenced: SequencedBuffer,
    next_unreliable_sequenced: Tsn,
    reliable_unsequenced: ReceivedRangeHandler,
    ready: VecDeque<Message>,
    buffered_bytes: usize,
    rx_messages_count: usize,
}

impl ReceiveQueue {
    /// Creates a queue for the peer that announced `peer` during the handshake.
    pub fn new(peer: &InitParams) -> Self {
        Self {
            control: SequencedBuffer::new(peer.control_tsn),
            reliable_sequenced: SequencedBuffer::new(peer.rel_seq_tsn),
            next_unreliable_sequenced: peer.unrel_seq_tsn,
            reliable_unsequenced: ReceivedRangeHandler::new(peer.rel_unseq_id),
            ready: VecDeque::new(),
            buffered_bytes: 0,
            rx_messages_count: 0,
        }
    }

    /// Adds a message received with sequence number `tsn`.
    ///
    /// Returns `false` if the message was discarded, as it had been received before or as a
    /// newer one had already been delivered.
    pub fn add(
        &mut self,
        tsn: Tsn,
        prerequisites: Option<DeliveryPrerequisites>,
        message: Message,
    ) -> bool {
        let size = message.payload.len();
        match message.flow {
            Flow::Control | Flow::ReliableSequenced => {
                let buffer = self.buffer_mut(message.flow);
                if !buffer.accepts(tsn) {
                    return false;
                }
                buffer.pending.insert(tsn, Pending { prerequisites, message: Some(message) });
                self.buffered_bytes += size;
                self.deliver_in_order();
            }
            Flow::ReliableUnsequenced => {
                if !self.reliable_unsequenced.add_tsn(tsn) {
                    return false;
                }
                self.push_ready(message);
            }
            Flow::UnreliableSequenced => {
                if tsn < self.next_unreliable_sequenced {
                    return false;
                }
                self.next_unreliable_sequenced = tsn + 1;
                let satisfied = prerequisites
                    .is_none_or(|p| self.prerequisites_satisfied(Flow::UnreliableSequenced, &p));
                if satisfied {
                    self.push_ready(message);
                }
                // Messages held back in the other flows may depend on this one.
                self.deliver_in_order();
                if !satisfied {
                    return false;
                }
            }
            Flow::UnreliableUnsequenced => self.push_ready(message),
        }
        true
    }

    /// Records that the sender has cancelled the packet with sequence number `tsn`, so that
    /// later messages don't wait for it.
    pub fn skip(&mut self, flow: Flow, tsn: Tsn) {
        match flow {
            Flow::Control | Flow::ReliableSequenced => {
                let buffer = self.buffer_mut(flow);
                if buffer.accepts(tsn) {
                    buffer.pending.insert(tsn, Pending { prerequisites: None, message: None });
                    self.deliver_in_order();
                }
            }
            Flow::ReliableUnsequenced => {
                self.reliable_unsequenced.add_tsn(tsn);
            }
            Flow::UnreliableSequenced => {
                if tsn >= self.next_unreliable_sequenced {
                    self.next_unreliable_sequenced = tsn + 1;
                    self.deliver_in_order();
                }
            }
            Flow::UnreliableUnsequenced => {}
        }
    }

    /// Returns true if `tsn` has been received, or skipped, in a reliable flow.
    pub fn has_received(&self, flow: Flow, tsn: Tsn) -> bool {
        match flow {
            Flow::Control => self.control.has_received(tsn),
            Flow::ReliableSequenced => self.reliable_sequenced.has_received(tsn),
            Flow::ReliableUnsequenced => self.reliable_unsequenced.already_received(tsn),
            Flow::UnreliableSequenced | Flow::UnreliableUnsequenced => false,
        }
    }

    pub fn next_message(&mut self) -> Option<Message> {
        let message = self.ready.pop_front()?;
        self.buffered_bytes -= message.payload.len();
        Some(message)
    }

    pub fn messages_ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Payload bytes received but not yet consumed by the application.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn rx_messages_count(&self) -> usize {
        self.rx_messages_count
    }

    /// The next TSN expected in `flow`, for sequenced flows.
    pub fn next_expected(&self, flow: Flow) -> Option<Tsn> {
        match flow {
            Flow::Control => Some(self.control.next_expected),
            Flow::ReliableSequenced => Some(self.reliable_sequenced.next_expected),
            Flow::UnreliableSequenced => Some(self.next_unreliable_sequenced),
            Flow::ReliableUnsequenced | Flow::UnreliableUnsequenced => None,
        }
    }

    fn buffer_mut(&mut self, flow: Flow) -> &mut SequencedBuffer {
        if flow == Flow::Control { &mut self.control } else { &mut self.reliable_sequenced }
    }

    fn push_ready(&mut self, message: Message) {
        // Ordered messages were accounted for when they were buffered.
        if !matches!(message.flow, Flow::Control | Flow::ReliableSequenced) {
            self.buffered_bytes += message.payload.len();
        }
        self.rx_messages_count += 1;
        self.ready.push_back(message);
    }

    fn prerequisites_satisfied(&self, flow: Flow, prerequisites: &DeliveryPrerequisites) -> bool {
        [
            (Flow::Control, prerequisites.control),
            (Flow::ReliableSequenced, prerequisites.reliable_sequenced),
            (Flow::UnreliableSequenced, prerequisites.unreliable_sequenced),
        ]
        .into_iter()
        .filter(|(other, _)| *other != flow)
        .all(|(other, tsn)| self.next_expected(other).is_some_and(|next| tsn <= next))
    }

    /// Moves messages at the head of the ordered flows to the ready queue, for as long as
    /// delivering one may unblock another.
    fn deliver_in_order(&mut self) {
        loop {
            let mut progress = false;
            for flow in [Flow::Control, Flow::ReliableSequenced] {
                while let Some(pending) = self.take_deliverable(flow) {
                    progress = true;
                    if let Some(message) = pending.message {
                        self.push_ready(message);
                    }
                }
            }
            if !progress {
                return;
            }
        }
    }

    fn take_deliverable(&mut self, flow: Flow) -> Option<Pending> {
        let buffer = if flow == Flow::Control { &self.control } else { &self.reliable_sequenced };
        let next = buffer.next_expected;
        let pending = buffer.pending.get(&next)?;
        if let Some(p) = &pending.prerequisites {
            if !self.prerequisites_satisfied(flow, p) {
                return None;
            }
        }
        let buffer = self.buffer_mut(flow);
        buffer.next_expected += 1;
        buffer.pending.remove(&next)
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        self.control.freeze(freezer);
        self.reliable_sequenced.freeze(freezer);
        freezer.put_u32(self.next_unreliable_sequenced.0);
        self.reliable_unsequenced.freeze(freezer);
        freezer.put_u32(self.ready.len() as u32);
        for message in &self.ready {
            freeze_message(message, freezer);
        }
    }

    pub fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        let control = SequencedBuffer::defrost(defroster)?;
        let reliable_sequenced = SequencedBuffer::defrost(defroster)?;
        let next_unreliable_sequenced = Tsn(defroster.get_u32()?);
        let reliable_unsequenced = ReceivedRangeHandler::defrost(defroster)?;
        let count = defroster.get_u32()?;
        let mut ready = VecDeque::new();
        for _ in 0..count {
            ready.push_back(defrost_message(defroster)?);
        }
        let buffered_bytes = ready.iter().map(|m| m.payload.len()).sum::<usize>()
            + [&control, &reliable_sequenced]
                .iter()
                .flat_map(|b| b.pending.values())
                .filter_map(|p| p.message.as_ref())
                .map(|m| m.payload.len())
                .sum::<usize>();
        Ok(Self {
            control,
            reliable_sequenced,
            next_unreliable_sequenced,
            reliable_unsequenced,
            ready,
            buffered_bytes,
            rx_messages_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn peer() -> InitParams {
        InitParams {
            validation: 1,
            control_tsn: Tsn(100),
            rel_seq_tsn: Tsn(200),
            unrel_seq_tsn: Tsn(300),
            rel_unseq_id: Tsn(400),
            unrel_unseq_id: Tsn(500),
        }
    }

    fn msg(flow: Flow, payload: &str) -> Message {
        Message::new(flow, 0, payload.as_bytes().to_vec())
    }

    fn drain(q: &mut ReceiveQueue) -> Vec<String> {
        std::iter::from_fn(|| q.next_message())
            .map(|m| String::from_utf8(m.payload).unwrap())
            .collect()
    }

    #[test]
    fn empty_queue() {
        let mut q = ReceiveQueue::new(&peer());
        assert_eq!(q.messages_ready_count(), 0);
        assert_eq!(q.buffered_bytes(), 0);
        assert!(q.next_message().is_none());
    }

    #[test]
    fn reliable_sequenced_in_order() {
        let mut q = ReceiveQueue::new(&peer());
        assert!(q.add(Tsn(200), None, msg(Flow::ReliableSequenced, "a")));
        assert!(q.add(Tsn(201), None, msg(Flow::ReliableSequenced, "b")));
        assert_eq!(q.messages_ready_count(), 2);
        assert_eq!(drain(&mut q), vec!["a", "b"]);
        assert_eq!(q.buffered_bytes(), 0);
    }

    #[test]
    fn reliable_sequenced_all_permutations() {
        let tsns = [200, 201, 202, 203];
        for perm in tsns.iter().permutations(tsns.len()) {
            let mut q = ReceiveQueue::new(&peer());
            for tsn in perm {
                q.add(Tsn(*tsn), None, msg(Flow::ReliableSequenced, &tsn.to_string()));
            }
            assert_eq!(drain(&mut q), vec!["200", "201", "202", "203"]);
        }
    }

    #[test]
    fn reliable_sequenced_waits_for_gap() {
        let mut q = ReceiveQueue::new(&peer());
        assert!(q.add(Tsn(201), None, msg(Flow::ReliableSequenced, "bb")));
        assert_eq!(q.messages_ready_count(), 0);
        assert_eq!(q.buffered_bytes(), 2);
        assert!(q.has_received(Flow::ReliableSequenced, Tsn(201)));
        assert!(!q.has_received(Flow::ReliableSequenced, Tsn(200)));

        assert!(q.add(Tsn(200), None, msg(Flow::ReliableSequenced, "a")));
        assert_eq!(q.buffered_bytes(), 3);
        assert_eq!(drain(&mut q), vec!["a", "bb"]);
        assert_eq!(q.next_expected(Flow::ReliableSequenced), Some(Tsn(202)));
    }

    #[test]
    fn duplicates_are_discarded() {
        let mut q = ReceiveQueue::new(&peer());
        assert!(q.add(Tsn(201), None, msg(Flow::ReliableSequenced, "b")));
        assert!(!q.add(Tsn(201), None, msg(Flow::ReliableSequenced, "b")));
        assert!(q.add(Tsn(200), None, msg(Flow::ReliableSequenced, "a")));
        assert!(!q.add(Tsn(200), None, msg(Flow::ReliableSequenced, "a")));
        assert!(q.add(Tsn(400), None, msg(Flow::ReliableUnsequenced, "x")));
        assert!(!q.add(Tsn(400), None, msg(Flow::ReliableUnsequenced, "x")));
        assert_eq!(drain(&mut q), vec!["a", "b", "x"]);
    }

    #[test]
    fn reliable_unsequenced_delivered_on_arrival() {
        let mut q = ReceiveQueue::new(&peer());
        assert!(q.add(Tsn(402), None, msg(Flow::ReliableUnsequenced, "c")));
        assert!(q.add(Tsn(400), None, msg(Flow::ReliableUnsequenced, "a")));
        assert_eq!(drain(&mut q), vec!["c", "a"]);
        assert!(q.has_received(Flow::ReliableUnsequenced, Tsn(402)));
        assert!(!q.has_received(Flow::ReliableUnsequenced, Tsn(401)));
    }

    #[test]
    fn unreliable_sequenced_drops_older() {
        let mut q = ReceiveQueue::new(&peer());
        assert!(q.add(Tsn(302), None, msg(Flow::UnreliableSequenced, "c")));
        assert!(!q.add(Tsn(301), None, msg(Flow::UnreliableSequenced, "b")));
        assert!(!q.add(Tsn(302), None, msg(Flow::UnreliableSequenced, "c")));
        assert!(q.add(Tsn(303), None, msg(Flow::UnreliableSequenced, "d")));
        assert_eq!(drain(&mut q), vec!["c", "d"]);
        assert_eq!(q.next_expected(Flow::UnreliableSequenced), Some(Tsn(304)));
    }

    #[test]
    fn unreliable_unsequenced_delivers_everything() {
        let mut q = ReceiveQueue::new(&peer());
        assert!(q.add(Tsn(7), None, msg(Flow::UnreliableUnsequenced, "a")));
        assert!(q.add(Tsn(7), None, msg(Flow::UnreliableUnsequenced, "a")));
        assert_eq!(q.rx_messages_count(), 2);
        assert_eq!(drain(&mut q), vec!["a", "a"]);
    }

    #[test]
    fn cancelled_packet_unblocks_ordered_flow() {
        let mut q = ReceiveQueue::new(&peer());
        assert!(q.add(Tsn(101), None, msg(Flow::Control, "b")));
        assert_eq!(q.messages_ready_count(), 0);
        q.skip(Flow::Control, Tsn(100));
        assert_eq!(drain(&mut q), vec!["b"]);
        assert_eq!(q.next_expected(Flow::Control), Some(Tsn(102)));

        q.skip(Flow::ReliableUnsequenced, Tsn(400));
        assert!(!q.add(Tsn(400), None, msg(Flow::ReliableUnsequenced, "late")));
    }

    #[test]
    fn cancelled_unreliable_sequenced_advances_and_releases_waiters() {
        let mut q = ReceiveQueue::new(&peer());
        let prerequisites = DeliveryPrerequisites {
            control: Tsn(0),
            reliable_sequenced: Tsn(200),
            unreliable_sequenced: Tsn(301),
        };
        assert!(q.add(Tsn(100), Some(prerequisites), msg(Flow::Control, "ctrl")));
        assert_eq!(q.messages_ready_count(), 0);

        q.skip(Flow::UnreliableSequenced, Tsn(300));
        assert_eq!(q.next_expected(Flow::UnreliableSequenced), Some(Tsn(301)));
        assert_eq!(drain(&mut q), vec!["ctrl"]);

        q.skip(Flow::UnreliableSequenced, Tsn(299));
        assert_eq!(q.next_expected(Flow::UnreliableSequenced), Some(Tsn(301)));
    }

    #[test]
    fn prerequisites_hold_back_delivery() {
        let mut q = ReceiveQueue::new(&peer());
        // Requires control packet 100 to have been processed first.
        let prerequisites = DeliveryPrerequisites {
            control: Tsn(101),
            reliable_sequenced: Tsn(0),
            unreliable_sequenced: Tsn(300),
        };
        assert!(q.add(Tsn(200), Some(prerequisites), msg(Flow::ReliableSequenced, "data")));
        assert_eq!(q.messages_ready_count(), 0);

        assert!(q.add(Tsn(100), None, msg(Flow::Control, "ctrl")));
        assert_eq!(drain(&mut q), vec!["ctrl", "data"]);
    }

    #[test]
    fn unsatisfied_unreliable_sequenced_is_dropped() {
        let mut q = ReceiveQueue::new(&peer());
        let prerequisites = DeliveryPrerequisites {
            control: Tsn(100),
            reliable_sequenced: Tsn(201),
            unreliable_sequenced: Tsn(0),
        };
        assert!(!q.add(Tsn(300), Some(prerequisites), msg(Flow::UnreliableSequenced, "u")));
        assert_eq!(q.messages_ready_count(), 0);
        assert_eq!(q.next_expected(Flow::UnreliableSequenced), Some(Tsn(301)));
    }

    #[test]
    fn freeze_and_defrost() {
        let mut q = ReceiveQueue::new(&peer());
        q.add(Tsn(202), None, msg(Flow::ReliableSequenced, "c"));
        q.add(Tsn(200), None, msg(Flow::ReliableSequenced, "a"));
        let mut fragment = msg(Flow::ReliableUnsequenced, "f");
        fragment.fragment = Fragment::Intermediate;
        fragment.tag = 9;
        q.add(Tsn(401), None, fragment.clone());

        let mut frozen: Vec<u8> = Vec::new();
        q.freeze(&mut frozen);
        let mut defroster: &[u8] = &frozen;
        let mut d = ReceiveQueue::defrost(&mut defroster).unwrap();
        assert!(defroster.is_empty());
        assert_eq!(d.buffered_bytes(), 3);
        assert_eq!(d.next_message().unwrap().payload, b"a".to_vec());
        assert_eq!(d.next_message(), Some(fragment));
        assert!(d.next_message().is_none());

        assert!(!d.add(Tsn(401), None, msg(Flow::ReliableUnsequenced, "f")));
        assert!(d.add(Tsn(201), None, msg(Flow::ReliableSequenced, "b")));
        assert_eq!(drain(&mut d), vec!["b", "c"]);
    }

    #[test]
    fn defrost_truncated_fails() {
        let q = ReceiveQueue::new(&peer());
        let mut frozen: Vec<u8> = Vec::new();
        q.freeze(&mut frozen);
        let mut defroster: &[u8] = &frozen[..frozen.len() - 1];
        assert!(ReceiveQueue::defrost(&mut defroster).is_err());
    }
}
