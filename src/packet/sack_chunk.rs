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

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::ensure;
use crate::packet::read_i64_be;
use crate::packet::read_u32_be;
use crate::packet::tsn_blocks::TsnBlocks;
use crate::packet::tsn_blocks::merge_into;
use crate::packet::tsn_blocks::read_blocks;
use crate::packet::write_i64_be;
use crate::packet::write_u32_be;
use crate::types::Flow;
use crate::types::Tsn;
use std::fmt;

pub(crate) const CHUNK_TYPE: u16 = 0x1001;

/// Same as [`CHUNK_TYPE`] but with a receiver-side bandwidth sample after the cumulative acks.
pub(crate) const REC_BAND_EST_CHUNK_TYPE: u16 = 0x1006;

const FLOW_CONTROL: u8 = 0x01;
const FLOW_RELIABLE_SEQUENCED: u8 = 0x02;
const FLOW_RELIABLE_UNSEQUENCED: u8 = 0x04;

const CUMULATIVE_ACKS_SIZE: usize = 12;
const BANDWIDTH_SAMPLE_SIZE: usize = 12;

/// Acknowledgement state of one reliable flow.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowAck {
    /// Every TSN up to and including this one has been received.
    pub cumulative_tsn: Tsn,
    /// TSNs received beyond `cumulative_tsn`.
    pub blocks: TsnBlocks,
}

impl FlowAck {
    pub fn new(cumulative_tsn: Tsn) -> Self {
        Self { cumulative_tsn, blocks: TsnBlocks::default() }
    }
}

/// Bytes received since the previous sample, and when the sample was taken.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandwidthSample {
    pub bytes_received: u32,
    pub timestamp: i64,
}

/// Selective Acknowledgement (SACK) chunk
///
/// Piggybacked on outgoing packets. Acknowledges the three reliable flows.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type = 0x1001/0x1006      |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 Control Cumulative TSN Ack                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Reliable Sequenced Cumulative TSN Ack               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Reliable Unsequenced Cumulative TSN Ack              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |              Bytes Received (type 0x1006 only)                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  Timestamp (type 0x1006 only)                 |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                         TSN Blocks                            /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SackChunk {
    pub control: FlowAck,
    pub reliable_sequenced: FlowAck,
    pub reliable_unsequenced: FlowAck,
    pub bandwidth_sample: Option<BandwidthSample>,
}

impl SackChunk {
    /// Returns the acknowledgement state for `flow`, if the flow is acknowledged at all.
    pub fn flow(&self, flow: Flow) -> Option<&FlowAck> {
        match flow {
            Flow::Control => Some(&self.control),
            Flow::ReliableSequenced => Some(&self.reliable_sequenced),
            Flow::ReliableUnsequenced => Some(&self.reliable_unsequenced),
            Flow::UnreliableSequenced | Flow::UnreliableUnsequenced => None,
        }
    }

    fn flows(&self) -> [(u8, &FlowAck); 3] {
        [
            (FLOW_CONTROL, &self.control),
            (FLOW_RELIABLE_SEQUENCED, &self.reliable_sequenced),
            (FLOW_RELIABLE_UNSEQUENCED, &self.reliable_unsequenced),
        ]
    }

    fn fixed_size(&self) -> usize {
        CUMULATIVE_ACKS_SIZE + self.bandwidth_sample.map_or(0, |_| BANDWIDTH_SAMPLE_SIZE)
    }

    /// Size of a chunk without any TSN blocks.
    pub(crate) fn min_serialized_size(with_bandwidth_sample: bool) -> usize {
        crate::packet::TLV_HEADER_SIZE
            + CUMULATIVE_ACKS_SIZE
            + if with_bandwidth_sample { BANDWIDTH_SAMPLE_SIZE } else { 0 }
    }
}

impl TryFrom<RawChunk<'_>> for SackChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(
            raw.typ == CHUNK_TYPE || raw.typ == REC_BAND_EST_CHUNK_TYPE,
            ChunkParseError::InvalidType
        );
        ensure!(raw.value.len() >= CUMULATIVE_ACKS_SIZE, ChunkParseError::InvalidLength);

        let mut sack = SackChunk {
            control: FlowAck::new(Tsn(read_u32_be!(&raw.value[0..4]))),
            reliable_sequenced: FlowAck::new(Tsn(read_u32_be!(&raw.value[4..8]))),
            reliable_unsequenced: FlowAck::new(Tsn(read_u32_be!(&raw.value[8..12]))),
            bandwidth_sample: None,
        };

        let mut offset = CUMULATIVE_ACKS_SIZE;
        if raw.typ == REC_BAND_EST_CHUNK_TYPE {
            ensure!(
                raw.value.len() >= CUMULATIVE_ACKS_SIZE + BANDWIDTH_SAMPLE_SIZE,
                ChunkParseError::InvalidLength
            );
            sack.bandwidth_sample = Some(BandwidthSample {
                bytes_received: read_u32_be!(&raw.value[12..16]),
                timestamp: read_i64_be!(&raw.value[16..24]),
            });
            offset += BANDWIDTH_SAMPLE_SIZE;
        }

        for (flow_flag, blocks) in read_blocks(&raw.value[offset..])? {
            let ack = match flow_flag {
                FLOW_CONTROL => &mut sack.control,
                FLOW_RELIABLE_SEQUENCED => &mut sack.reliable_sequenced,
                FLOW_RELIABLE_UNSEQUENCED => &mut sack.reliable_unsequenced,
                _ => return Err(ChunkParseError::InvalidValue),
            };
            merge_into(&mut ack.blocks, blocks);
        }
        Ok(sack)
    }
}

impl SerializableTlv for SackChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let typ =
            if self.bandwidth_sample.is_some() { REC_BAND_EST_CHUNK_TYPE } else { CHUNK_TYPE };
        let value = write_chunk_header(typ, self.value_size(), output);
        write_u32_be!(&mut value[0..4], self.control.cumulative_tsn.0);
        write_u32_be!(&mut value[4..8], self.reliable_sequenced.cumulative_tsn.0);
        write_u32_be!(&mut value[8..12], self.reliable_unsequenced.cumulative_tsn.0);
        if let Some(sample) = self.bandwidth_sample {
            write_u32_be!(&mut value[12..16], sample.bytes_received);
            write_i64_be!(&mut value[16..24], sample.timestamp);
        }

        let mut offset = self.fixed_size();
        for (flow_flag, ack) in self.flows() {
            offset += ack.blocks.write_to(flow_flag, &mut value[offset..]);
        }
    }

    fn value_size(&self) -> usize {
        self.fixed_size()
            + self.flows().iter().map(|(_, ack)| ack.blocks.serialized_size()).sum::<usize>()
    }
}

impl fmt::Display for SackChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SACK, control_ack={}, rel_seq_ack={}, rel_unseq_ack={}",
            self.control.cumulative_tsn,
            self.reliable_sequenced.cumulative_tsn,
            self.reliable_unsequenced.cumulative_tsn
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_capture() {
        const BYTES: &[u8] = &[
            0x10, 0x01, 0x00, 0x1b, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00,
            0x00, 0x1e, 0x12, 0x00, 0x0b, 0x00, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00, 0x18,
        ];
        let (raw, rest) = RawChunk::from_bytes(BYTES).unwrap();
        assert!(rest.is_empty());
        let chunk = SackChunk::try_from(raw).unwrap();

        assert_eq!(chunk.control.cumulative_tsn, Tsn(10));
        assert_eq!(chunk.reliable_sequenced.cumulative_tsn, Tsn(20));
        assert_eq!(chunk.reliable_unsequenced.cumulative_tsn, Tsn(30));
        assert!(chunk.bandwidth_sample.is_none());
        assert_eq!(chunk.reliable_sequenced.blocks.ranges, vec![(Tsn(22), Tsn(24))]);
        assert!(chunk.control.blocks.is_empty());
    }

    #[test]
    fn serialize_and_deserialize() {
        let chunk = SackChunk {
            control: FlowAck::new(Tsn(100)),
            reliable_sequenced: FlowAck {
                cumulative_tsn: Tsn(10),
                blocks: TsnBlocks {
                    ranges: vec![(Tsn(12), Tsn(14)), (Tsn(18), Tsn(25)), (Tsn(27), Tsn(28))],
                    singles: vec![Tsn(16), Tsn(32)],
                },
            },
            reliable_unsequenced: FlowAck {
                cumulative_tsn: Tsn(50),
                blocks: TsnBlocks { ranges: vec![], singles: vec![Tsn(52)] },
            },
            bandwidth_sample: None,
        };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(serialized.len(), 4 + 12 + (3 + 3 * 8) + (3 + 2 * 4) + (3 + 4));

        let deserialized =
            SackChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert_eq!(deserialized, chunk);
    }

    #[test]
    fn serialize_and_deserialize_with_bandwidth_sample() {
        let chunk = SackChunk {
            control: FlowAck::new(Tsn(1)),
            reliable_sequenced: FlowAck::new(Tsn(2)),
            reliable_unsequenced: FlowAck::new(Tsn(3)),
            bandwidth_sample: Some(BandwidthSample { bytes_received: 4000, timestamp: 123456 }),
        };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(&serialized[0..2], &[0x10, 0x06]);
        assert_eq!(serialized.len(), SackChunk::min_serialized_size(true));

        let deserialized =
            SackChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert_eq!(deserialized, chunk);
    }

    #[test]
    fn unreliable_flow_block_is_rejected() {
        const BYTES: &[u8] = &[
            0x10, 0x01, 0x00, 0x17, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00,
            0x00, 0x1e, 0x28, 0x00, 0x07, 0x00, 0x00, 0x00, 0x16,
        ];
        assert_eq!(
            SackChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidValue
        );
    }

    #[test]
    fn unreliable_flows_have_no_ack() {
        let chunk = SackChunk {
            control: FlowAck::new(Tsn(1)),
            reliable_sequenced: FlowAck::new(Tsn(2)),
            reliable_unsequenced: FlowAck::new(Tsn(3)),
            bandwidth_sample: None,
        };
        assert_eq!(chunk.flow(Flow::ReliableUnsequenced).unwrap().cumulative_tsn, Tsn(3));
        assert!(chunk.flow(Flow::UnreliableSequenced).is_none());
    }
}
