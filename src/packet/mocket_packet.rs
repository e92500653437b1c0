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
use crate::packet::AsSerializableTlv;
use crate::packet::BuildError;
use crate::packet::ChunkParseError;
use crate::packet::chunk::Chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::ensure;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Flow;
use crate::types::Tsn;
use thiserror::Error;

pub const HEADER_SIZE: usize = 14;
pub(crate) const DELIVERY_PREREQUISITES_SIZE: usize = 8;

/// Upper bound for received datagrams. The configured MTU is normally much lower.
const MAX_PACKET_SIZE: usize = 65535;

pub(crate) const FLAG_RELIABLE: u16 = 0x0001;
pub(crate) const FLAG_SEQUENCED: u16 = 0x0002;
pub(crate) const FLAG_MSG_PACKET: u16 = 0x0004;
pub(crate) const FLAG_CONTROL: u16 = 0x0008;
pub(crate) const FLAG_DELIVERY_PREREQUISITES: u16 = 0x0010;
pub(crate) const FLAG_FIRST_FRAGMENT: u16 = 0x0020;
pub(crate) const FLAG_INTERMEDIATE_FRAGMENT: u16 = 0x0040;
pub(crate) const FLAG_LAST_FRAGMENT: u16 = 0x0080;
pub(crate) const FLAG_RETRANSMITTED: u16 = 0x0100;
pub(crate) const FLAG_PROTOCOL_VERSION: u16 = 0x1000;

/// Packet header
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |             Flags             |          Window Size          :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :  Window Size (continued)      |          Validation           :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :  Validation (continued)       |        Sequence Number        :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :  Sequence Number (continued)  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The validation is the value chosen by the receiver of the packet during the handshake.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacketHeader {
    pub flags: u16,
    pub window_size: u32,
    pub validation: u32,
    pub sequence_number: Tsn,
}

impl PacketHeader {
    pub fn new(validation: u32, window_size: u32) -> Self {
        Self {
            flags: FLAG_PROTOCOL_VERSION | FLAG_MSG_PACKET,
            window_size,
            validation,
            sequence_number: Tsn(0),
        }
    }

    /// Creates a header for a packet carrying `sequence_number` in `flow`.
    pub fn for_flow(flow: Flow, sequence_number: Tsn, validation: u32, window_size: u32) -> Self {
        let mut header = Self::new(validation, window_size);
        header.flags |= match flow {
            Flow::Control => FLAG_CONTROL,
            Flow::ReliableSequenced => FLAG_RELIABLE | FLAG_SEQUENCED,
            Flow::ReliableUnsequenced => FLAG_RELIABLE,
            Flow::UnreliableSequenced => FLAG_SEQUENCED,
            Flow::UnreliableUnsequenced => 0,
        };
        header.sequence_number = sequence_number;
        header
    }

    /// The flow is given by the control flag, or else by the reliable and sequenced flags.
    /// Packets without any of them (such as a lone SACK) are unreliable and unsequenced.
    pub fn flow(&self) -> Flow {
        if self.flags & FLAG_CONTROL != 0 {
            Flow::Control
        } else {
            Flow::from(self.flags & FLAG_RELIABLE != 0, self.flags & FLAG_SEQUENCED != 0)
        }
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn fragment(&self) -> Fragment {
        if self.has_flag(FLAG_FIRST_FRAGMENT) {
            Fragment::First
        } else if self.has_flag(FLAG_INTERMEDIATE_FRAGMENT) {
            Fragment::Intermediate
        } else if self.has_flag(FLAG_LAST_FRAGMENT) {
            Fragment::Last
        } else {
            Fragment::Unfragmented
        }
    }

    pub fn set_fragment(&mut self, fragment: Fragment) {
        self.flags &= !(FLAG_FIRST_FRAGMENT | FLAG_INTERMEDIATE_FRAGMENT | FLAG_LAST_FRAGMENT);
        self.flags |= match fragment {
            Fragment::Unfragmented => 0,
            Fragment::First => FLAG_FIRST_FRAGMENT,
            Fragment::Intermediate => FLAG_INTERMEDIATE_FRAGMENT,
            Fragment::Last => FLAG_LAST_FRAGMENT,
        };
    }

    fn read_from(data: &[u8]) -> Self {
        Self {
            flags: read_u16_be!(&data[0..2]),
            window_size: read_u32_be!(&data[2..6]),
            validation: read_u32_be!(&data[6..10]),
            sequence_number: Tsn(read_u32_be!(&data[10..14])),
        }
    }

    fn write_to(&self, output: &mut [u8]) {
        write_u16_be!(&mut output[0..2], self.flags);
        write_u32_be!(&mut output[2..6], self.window_size);
        write_u32_be!(&mut output[6..10], self.validation);
        write_u32_be!(&mut output[10..14], self.sequence_number.0);
    }
}

/// The TSNs in the other sequenced flows that must have been processed before a packet may be
/// delivered. Only the two flows other than the packet's own flow are sent on the wire, in the
/// order control, reliable sequenced, unreliable sequenced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeliveryPrerequisites {
    pub control: Tsn,
    pub reliable_sequenced: Tsn,
    pub unreliable_sequenced: Tsn,
}

impl DeliveryPrerequisites {
    fn read_from(flow: Flow, data: &[u8]) -> Option<Self> {
        let first = Tsn(read_u32_be!(&data[0..4]));
        let second = Tsn(read_u32_be!(&data[4..8]));
        match flow {
            Flow::Control => Some(Self {
                control: Tsn(0),
                reliable_sequenced: first,
                unreliable_sequenced: second,
            }),
            Flow::ReliableSequenced => Some(Self {
                control: first,
                reliable_sequenced: Tsn(0),
                unreliable_sequenced: second,
            }),
            Flow::UnreliableSequenced => Some(Self {
                control: first,
                reliable_sequenced: second,
                unreliable_sequenced: Tsn(0),
            }),
            Flow::ReliableUnsequenced | Flow::UnreliableUnsequenced => None,
        }
    }

    fn write_to(&self, flow: Flow, output: &mut [u8]) {
        let (first, second) = match flow {
            Flow::Control => (self.reliable_sequenced, self.unreliable_sequenced),
            Flow::ReliableSequenced => (self.control, self.unreliable_sequenced),
            _ => (self.control, self.reliable_sequenced),
        };
        write_u32_be!(&mut output[0..4], first.0);
        write_u32_be!(&mut output[4..8], second.0);
    }
}

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum PacketParseError {
    #[error("Invalid packet size")]
    InvalidPacketSize,
    #[error("Delivery prerequisites on an unsequenced packet")]
    InvalidDeliveryPrerequisites,
    #[error("Data chunk not first, or a chunk following piggyback chunks")]
    InvalidChunkOrder,
    #[error("Failed to parse chunk")]
    FailedParseChunk(ChunkParseError),
}

impl From<ChunkParseError> for PacketParseError {
    fn from(e: ChunkParseError) -> Self {
        Self::FailedParseChunk(e)
    }
}

/// A parsed packet.
#[derive(Debug)]
pub struct MocketPacket {
    pub header: PacketHeader,
    pub delivery_prerequisites: Option<DeliveryPrerequisites>,
    pub chunks: Vec<Chunk>,
    size: usize,
    size_without_piggyback: usize,
}

impl MocketPacket {
    pub fn from_bytes(data: &[u8]) -> Result<MocketPacket, PacketParseError> {
        ensure!(
            data.len() >= HEADER_SIZE && data.len() <= MAX_PACKET_SIZE,
            PacketParseError::InvalidPacketSize
        );

        let header = PacketHeader::read_from(data);
        let mut offset = HEADER_SIZE;
        let mut delivery_prerequisites = None;
        if header.has_flag(FLAG_DELIVERY_PREREQUISITES) {
            ensure!(
                data.len() >= HEADER_SIZE + DELIVERY_PREREQUISITES_SIZE,
                PacketParseError::InvalidPacketSize
            );
            delivery_prerequisites =
                DeliveryPrerequisites::read_from(header.flow(), &data[offset..]);
            ensure!(
                delivery_prerequisites.is_some(),
                PacketParseError::InvalidDeliveryPrerequisites
            );
            offset += DELIVERY_PREREQUISITES_SIZE;
        }

        let mut chunks: Vec<Chunk> = Vec::with_capacity(4);
        let mut size_without_piggyback = data.len();
        let mut remaining = &data[offset..];
        while !remaining.is_empty() {
            let chunk_offset = data.len() - remaining.len();
            let (raw, next_remaining) = RawChunk::from_bytes(remaining)?;
            let chunk = Chunk::try_from(raw)?;

            let seen_piggyback = size_without_piggyback < data.len();
            if chunk.is_piggyback() {
                if !seen_piggyback {
                    size_without_piggyback = chunk_offset;
                }
            } else {
                ensure!(!seen_piggyback, PacketParseError::InvalidChunkOrder);
            }
            if let Chunk::Data(_) = chunk {
                ensure!(chunks.is_empty(), PacketParseError::InvalidChunkOrder);
            }
            chunks.push(chunk);
            remaining = next_remaining;
        }

        Ok(MocketPacket {
            header,
            delivery_prerequisites,
            chunks,
            size: data.len(),
            size_without_piggyback,
        })
    }

    /// Removes and returns the DATA chunk.
    pub fn take_data_chunk(&mut self) -> Option<DataChunk> {
        if !matches!(self.chunks.first(), Some(Chunk::Data(_))) {
            return None;
        }
        match self.chunks.remove(0) {
            Chunk::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of the packet as it was sent, excluding piggyback chunks.
    pub fn size_without_piggyback(&self) -> usize {
        self.size_without_piggyback
    }
}

/// Reads the tag of the DATA chunk directly from a serialized packet.
pub(crate) fn peek_data_tag(data: &[u8]) -> Option<u16> {
    if data.len() < HEADER_SIZE {
        return None;
    }
    let header = PacketHeader::read_from(data);
    let mut offset = HEADER_SIZE;
    if header.has_flag(FLAG_DELIVERY_PREREQUISITES) {
        offset += DELIVERY_PREREQUISITES_SIZE;
    }
    if data.len() < offset + crate::packet::data_chunk::HEADER_SIZE
        || read_u16_be!(&data[offset..offset + 2]) != crate::packet::data_chunk::CHUNK_TYPE
    {
        return None;
    }
    Some(read_u16_be!(&data[offset + 4..offset + 6]))
}

/// Serializes a packet, chunk by chunk, within a byte budget.
///
/// Piggyback chunks (SACK, CANCELLED, TIMESTAMP and TIMESTAMP-ACK) must be added after all
/// other chunks. The builder remembers where they start, so that the packet can be stored for
/// retransmission without them, see [`PacketBuilder::bytes_without_piggyback`].
pub struct PacketBuilder {
    header: PacketHeader,
    max_packet_size: usize,
    data: Vec<u8>,
    first_piggyback_offset: Option<usize>,
}

impl PacketBuilder {
    pub fn new(header: PacketHeader, max_packet_size: usize) -> Self {
        let mut data = Vec::with_capacity(max_packet_size);
        data.resize(HEADER_SIZE, 0);
        Self { header, max_packet_size, data, first_piggyback_offset: None }
    }

    /// Continues building a packet previously produced by [`Self::bytes_without_piggyback`],
    /// for example to retransmit it with fresh acknowledgement information.
    pub fn from_stored(stored: &[u8], max_packet_size: usize) -> Self {
        debug_assert!(stored.len() >= HEADER_SIZE);
        Self {
            header: PacketHeader::read_from(stored),
            max_packet_size: max_packet_size.max(stored.len()),
            data: stored.to_vec(),
            first_piggyback_offset: None,
        }
    }

    pub fn header_mut(&mut self) -> &mut PacketHeader {
        &mut self.header
    }

    /// Must be called before any chunk is added, and only for sequenced packets.
    pub fn set_delivery_prerequisites(&mut self, prerequisites: &DeliveryPrerequisites) {
        debug_assert_eq!(self.data.len(), HEADER_SIZE);
        debug_assert!(self.header.flow().is_sequenced());
        self.header.flags |= FLAG_DELIVERY_PREREQUISITES;
        self.data.resize(HEADER_SIZE + DELIVERY_PREREQUISITES_SIZE, 0);
        prerequisites.write_to(self.header.flow(), &mut self.data[HEADER_SIZE..]);
    }

    pub fn add(&mut self, chunk: &Chunk) -> Result<&mut Self, BuildError> {
        debug_assert!(!matches!(chunk, Chunk::Data(_)) || self.is_empty());
        debug_assert!(chunk.is_piggyback() || self.first_piggyback_offset.is_none());

        let chunk_size = chunk.as_serializable().serialized_size();
        ensure!(chunk_size <= self.bytes_remaining(), BuildError::InsufficientSpace);

        let chunk_offset = self.data.len();
        if chunk.is_piggyback() && self.first_piggyback_offset.is_none() {
            self.first_piggyback_offset = Some(chunk_offset);
        }
        self.data.resize(chunk_offset + chunk_size, 0);
        chunk.as_serializable().serialize_to(&mut self.data[chunk_offset..]);
        Ok(self)
    }

    pub fn bytes_remaining(&self) -> usize {
        self.max_packet_size.saturating_sub(self.data.len())
    }

    /// Returns true if no chunk has been added.
    pub fn is_empty(&self) -> bool {
        self.data.len() == HEADER_SIZE + self.prerequisites_size()
    }

    fn prerequisites_size(&self) -> usize {
        if self.header.has_flag(FLAG_DELIVERY_PREREQUISITES) {
            DELIVERY_PREREQUISITES_SIZE
        } else {
            0
        }
    }

    /// The serialized packet, excluding any piggyback chunks.
    pub fn bytes_without_piggyback(&self) -> Vec<u8> {
        let end = self.first_piggyback_offset.unwrap_or(self.data.len());
        let mut out = self.data[..end].to_vec();
        self.header.write_to(&mut out);
        out
    }

    pub fn build(&mut self) -> Vec<u8> {
        self.header.write_to(&mut self.data);
        let mut out = Vec::with_capacity(self.max_packet_size);
        out.resize(HEADER_SIZE, 0);
        self.first_piggyback_offset = None;
        std::mem::swap(&mut self.data, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::cancelled_chunk::CancelledChunk;
    use crate::packet::header_only_chunks::ShutdownChunk;
    use crate::packet::sack_chunk::FlowAck;
    use crate::packet::sack_chunk::SackChunk;
    use crate::packet::timestamp_chunks::HeartbeatChunk;

    fn sack() -> Chunk {
        Chunk::Sack(SackChunk {
            control: FlowAck::new(Tsn(1)),
            reliable_sequenced: FlowAck::new(Tsn(2)),
            reliable_unsequenced: FlowAck::new(Tsn(3)),
            bandwidth_sample: None,
        })
    }

    #[test]
    fn deserialize_data_packet_from_capture() {
        // Reliable sequenced packet, window 65536, validation 0x12345678, TSN 7, carrying a
        // DATA chunk with tag 9 and payload "hi".
        const BYTES: &[u8] = &[
            0x10, 0x07, 0x00, 0x01, 0x00, 0x00, 0x12, 0x34, 0x56, 0x78, 0x00, 0x00, 0x00, 0x07,
            0x20, 0x01, 0x00, 0x08, 0x00, 0x09, 0x68, 0x69,
        ];
        let mut packet = MocketPacket::from_bytes(BYTES).unwrap();

        assert_eq!(packet.header.window_size, 65536);
        assert_eq!(packet.header.validation, 0x12345678);
        assert_eq!(packet.header.sequence_number, Tsn(7));
        assert_eq!(packet.header.flow(), Flow::ReliableSequenced);
        assert!(packet.delivery_prerequisites.is_none());
        assert_eq!(packet.size_without_piggyback(), BYTES.len());
        let data = packet.take_data_chunk().unwrap();
        assert_eq!(data.tag, 9);
        assert_eq!(data.payload, b"hi");
        assert!(packet.chunks.is_empty());
        assert_eq!(peek_data_tag(BYTES), Some(9));
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(
            MocketPacket::from_bytes(&[0x10, 0x00, 0x00]).unwrap_err(),
            PacketParseError::InvalidPacketSize
        );
    }

    #[test]
    fn chunk_past_end_is_rejected() {
        const BYTES: &[u8] = &[
            0x10, 0x04, 0x00, 0x01, 0x00, 0x00, 0x12, 0x34, 0x56, 0x78, 0x00, 0x00, 0x00, 0x00,
            0x40, 0x05, 0x00, 0x08,
        ];
        assert_eq!(
            MocketPacket::from_bytes(BYTES).unwrap_err(),
            PacketParseError::FailedParseChunk(ChunkParseError::InvalidLength)
        );
    }

    #[test]
    fn header_only_packet_has_no_chunks() {
        let bytes = PacketBuilder::new(PacketHeader::new(1, 2), 1000).build();
        let packet = MocketPacket::from_bytes(&bytes).unwrap();
        assert!(packet.chunks.is_empty());
        assert_eq!(packet.header.flow(), Flow::UnreliableUnsequenced);
        assert_eq!(packet.header.sequence_number, Tsn(0));
    }

    #[test]
    fn build_and_parse_with_piggyback() {
        let header = PacketHeader::for_flow(Flow::Control, Tsn(42), 0xcafe, 1000);
        let mut builder = PacketBuilder::new(header, 1000);
        builder.add(&Chunk::Shutdown(ShutdownChunk {})).unwrap();
        builder.add(&sack()).unwrap();
        builder.add(&Chunk::Cancelled(CancelledChunk::default())).unwrap();

        let stored = builder.bytes_without_piggyback();
        assert_eq!(stored.len(), HEADER_SIZE + 4);

        let bytes = builder.build();
        let mut packet = MocketPacket::from_bytes(&bytes).unwrap();
        assert_eq!(packet.header.flow(), Flow::Control);
        assert_eq!(packet.header.sequence_number, Tsn(42));
        assert_eq!(packet.chunks.len(), 3);
        assert!(matches!(packet.chunks[0], Chunk::Shutdown(_)));
        assert!(matches!(packet.chunks[1], Chunk::Sack(_)));
        assert!(matches!(packet.chunks[2], Chunk::Cancelled(_)));
        assert_eq!(packet.size_without_piggyback(), stored.len());
        assert!(packet.take_data_chunk().is_none());
    }

    #[test]
    fn retransmission_rebuilds_from_stored_bytes() {
        let header = PacketHeader::for_flow(Flow::ReliableUnsequenced, Tsn(5), 7, 1000);
        let mut builder = PacketBuilder::new(header, 100);
        builder.add(&Chunk::Data(DataChunk { tag: 3, payload: vec![1, 2, 3] })).unwrap();
        builder.add(&sack()).unwrap();
        let stored = builder.bytes_without_piggyback();

        let mut retransmission = PacketBuilder::from_stored(&stored, 100);
        retransmission.header_mut().flags |= FLAG_RETRANSMITTED;
        retransmission.header_mut().window_size = 500;
        retransmission.add(&sack()).unwrap();
        let bytes = retransmission.build();

        let mut packet = MocketPacket::from_bytes(&bytes).unwrap();
        assert!(packet.header.has_flag(FLAG_RETRANSMITTED));
        assert_eq!(packet.header.window_size, 500);
        assert_eq!(packet.header.flow(), Flow::ReliableUnsequenced);
        assert!(matches!(packet.chunks[1], Chunk::Sack(_)));
        assert_eq!(packet.take_data_chunk().unwrap().payload, vec![1, 2, 3]);
    }

    #[test]
    fn delivery_prerequisites_round_trip() {
        let header = PacketHeader::for_flow(Flow::ReliableSequenced, Tsn(5), 7, 1000);
        let mut builder = PacketBuilder::new(header, 100);
        builder.set_delivery_prerequisites(&DeliveryPrerequisites {
            control: Tsn(11),
            reliable_sequenced: Tsn(99),
            unreliable_sequenced: Tsn(22),
        });
        assert!(builder.is_empty());
        builder.add(&Chunk::Data(DataChunk { tag: 0, payload: vec![7] })).unwrap();
        let bytes = builder.build();
        assert_eq!(peek_data_tag(&bytes), Some(0));

        let mut packet = MocketPacket::from_bytes(&bytes).unwrap();
        let prerequisites = packet.delivery_prerequisites.unwrap();
        assert_eq!(prerequisites.control, Tsn(11));
        assert_eq!(prerequisites.unreliable_sequenced, Tsn(22));
        assert_eq!(packet.take_data_chunk().unwrap().payload, vec![7]);
    }

    #[test]
    fn budget_is_enforced() {
        let mut builder = PacketBuilder::new(PacketHeader::new(1, 1), HEADER_SIZE + 20);
        builder.add(&Chunk::Heartbeat(HeartbeatChunk { timestamp: 1 })).unwrap();
        assert_eq!(builder.bytes_remaining(), 8);
        assert_eq!(
            builder.add(&Chunk::Heartbeat(HeartbeatChunk { timestamp: 2 })).err(),
            Some(BuildError::InsufficientSpace)
        );
    }

    #[test]
    fn chunk_after_piggyback_is_rejected() {
        const BYTES: &[u8] = &[
            0x10, 0x04, 0x00, 0x01, 0x00, 0x00, 0x12, 0x34, 0x56, 0x78, 0x00, 0x00, 0x00, 0x00,
            0x10, 0x03, 0x00, 0x04, 0x40, 0x05, 0x00, 0x04,
        ];
        assert_eq!(
            MocketPacket::from_bytes(BYTES).unwrap_err(),
            PacketParseError::InvalidChunkOrder
        );
    }

    #[test]
    fn fragment_flags() {
        let mut header = PacketHeader::for_flow(Flow::ReliableSequenced, Tsn(1), 1, 0);
        assert_eq!(header.fragment(), Fragment::Unfragmented);
        header.set_fragment(Fragment::First);
        assert_eq!(header.flags & 0x00e0, 0x0020);
        header.set_fragment(Fragment::Last);
        assert_eq!(header.fragment(), Fragment::Last);
        assert_eq!(header.flags & 0x00e0, 0x0080);
        assert_eq!(header.flow(), Flow::ReliableSequenced);
    }
}
