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
use crate::packet::read_u32_be;
use crate::packet::write_u32_be;
use crate::types::Flow;
use crate::types::Tsn;
use std::fmt;

/// Size of the serialized [`InitParams`].
pub(crate) const INIT_PARAMS_SIZE: usize = 24;

/// The initial values that one side of a connection announces in its INIT, INIT-ACK,
/// SIMPLE-CONNECT or SIMPLE-CONNECT-ACK chunk.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Validation                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Initial Control TSN                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                Initial Reliable Sequenced TSN                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               Initial Unreliable Sequenced TSN                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |             Initial Reliable Unsequenced Message ID           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            Initial Unreliable Unsequenced Message ID          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InitParams {
    /// Expected in the header of every packet sent to the side that announced it. It must be
    /// positive when read as a signed 32-bit integer.
    pub validation: u32,
    pub control_tsn: Tsn,
    pub rel_seq_tsn: Tsn,
    pub unrel_seq_tsn: Tsn,
    pub rel_unseq_id: Tsn,
    pub unrel_unseq_id: Tsn,
}

impl InitParams {
    pub fn is_valid_validation(validation: u32) -> bool {
        validation != 0 && validation <= i32::MAX as u32
    }

    /// The initial sequence number of `flow`.
    pub fn initial_tsn(&self, flow: Flow) -> Tsn {
        match flow {
            Flow::Control => self.control_tsn,
            Flow::ReliableSequenced => self.rel_seq_tsn,
            Flow::ReliableUnsequenced => self.rel_unseq_id,
            Flow::UnreliableSequenced => self.unrel_seq_tsn,
            Flow::UnreliableUnsequenced => self.unrel_unseq_id,
        }
    }

    pub(crate) fn read_from(data: &[u8]) -> Result<Self, ChunkParseError> {
        ensure!(data.len() >= INIT_PARAMS_SIZE, ChunkParseError::InvalidLength);
        let validation = read_u32_be!(&data[0..4]);
        ensure!(Self::is_valid_validation(validation), ChunkParseError::InvalidValue);
        Ok(InitParams {
            validation,
            control_tsn: Tsn(read_u32_be!(&data[4..8])),
            rel_seq_tsn: Tsn(read_u32_be!(&data[8..12])),
            unrel_seq_tsn: Tsn(read_u32_be!(&data[12..16])),
            rel_unseq_id: Tsn(read_u32_be!(&data[16..20])),
            unrel_unseq_id: Tsn(read_u32_be!(&data[20..24])),
        })
    }

    pub(crate) fn write_to(&self, output: &mut [u8]) {
        write_u32_be!(&mut output[0..4], self.validation);
        write_u32_be!(&mut output[4..8], self.control_tsn.0);
        write_u32_be!(&mut output[8..12], self.rel_seq_tsn.0);
        write_u32_be!(&mut output[12..16], self.unrel_seq_tsn.0);
        write_u32_be!(&mut output[16..20], self.rel_unseq_id.0);
        write_u32_be!(&mut output[20..24], self.unrel_unseq_id.0);
    }
}

/// Initiation (INIT) chunk
///
/// The first chunk of the four-way handshake. The value consists of the sender's
/// [`InitParams`].
#[derive(Debug, PartialEq)]
pub struct InitChunk {
    pub params: InitParams,
}

impl InitChunk {
    pub(crate) const CHUNK_TYPE: u16 = 0x4001;
}

impl TryFrom<RawChunk<'_>> for InitChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(raw.typ == Self::CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() == INIT_PARAMS_SIZE, ChunkParseError::InvalidLength);
        Ok(InitChunk { params: InitParams::read_from(raw.value)? })
    }
}

impl SerializableTlv for InitChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(Self::CHUNK_TYPE, self.value_size(), output);
        self.params.write_to(value);
    }

    fn value_size(&self) -> usize {
        INIT_PARAMS_SIZE
    }
}

impl fmt::Display for InitChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INIT, validation={}", self.params.validation)
    }
}

/// Initiation Acknowledgement (INIT-ACK) chunk
///
/// The responder's [`InitParams`], followed by the state cookie that the initiator must echo.
#[derive(Debug, PartialEq)]
pub struct InitAckChunk {
    pub params: InitParams,
    pub state_cookie: Vec<u8>,
}

impl InitAckChunk {
    pub(crate) const CHUNK_TYPE: u16 = 0x4002;
}

impl TryFrom<RawChunk<'_>> for InitAckChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(raw.typ == Self::CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() > INIT_PARAMS_SIZE, ChunkParseError::InvalidLength);
        Ok(InitAckChunk {
            params: InitParams::read_from(raw.value)?,
            state_cookie: raw.value[INIT_PARAMS_SIZE..].to_vec(),
        })
    }
}

impl SerializableTlv for InitAckChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(Self::CHUNK_TYPE, self.value_size(), output);
        self.params.write_to(value);
        value[INIT_PARAMS_SIZE..].copy_from_slice(&self.state_cookie);
    }

    fn value_size(&self) -> usize {
        INIT_PARAMS_SIZE + self.state_cookie.len()
    }
}

impl fmt::Display for InitAckChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INIT-ACK, validation={}", self.params.validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> InitParams {
        InitParams {
            validation: 0x1234_5678,
            control_tsn: Tsn(1),
            rel_seq_tsn: Tsn(2),
            unrel_seq_tsn: Tsn(3),
            rel_unseq_id: Tsn(4),
            unrel_unseq_id: Tsn(5),
        }
    }

    #[test]
    fn init_from_capture() {
        const BYTES: &[u8] = &[
            0x40, 0x01, 0x00, 0x1c, 0x12, 0x34, 0x56, 0x78, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x05,
        ];
        let c = InitChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        assert_eq!(c.params, params());
        assert_eq!(c.params.initial_tsn(Flow::UnreliableSequenced), Tsn(3));
        assert_eq!(c.params.initial_tsn(Flow::ReliableUnsequenced), Tsn(4));
    }

    #[test]
    fn rejects_zero_validation() {
        let chunk = InitChunk { params: InitParams { validation: 0, ..params() } };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(
            InitChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidValue
        );
    }

    #[test]
    fn rejects_negative_validation() {
        assert!(!InitParams::is_valid_validation(0x8000_0000));
        assert!(InitParams::is_valid_validation(0x7fff_ffff));
    }

    #[test]
    fn init_ack_serialize_and_deserialize() {
        let chunk = InitAckChunk { params: params(), state_cookie: vec![7; 68] };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        let deserialized =
            InitAckChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();

        assert_eq!(deserialized, chunk);
    }

    #[test]
    fn init_ack_without_cookie_is_rejected() {
        let chunk = InitChunk { params: params() };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        serialized[1] = 0x02;
        assert_eq!(
            InitAckChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidLength
        );
    }
}
