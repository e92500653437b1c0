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

//! Metadata chunks that carry a single signed 64-bit timestamp, in milliseconds.
//!
//! ```txt
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Chunk Type           |          Length = 12          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                           Timestamp                           +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::ensure;
use crate::packet::read_i64_be;
use crate::packet::write_i64_be;
use std::fmt;

macro_rules! timestamp_chunk {
    ($(#[$doc:meta])* $name:ident, $typ:expr, $display:expr) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq)]
        pub struct $name {
            pub timestamp: i64,
        }

        impl $name {
            pub(crate) const CHUNK_TYPE: u16 = $typ;
        }

        impl TryFrom<RawChunk<'_>> for $name {
            type Error = ChunkParseError;

            fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
                ensure!(raw.typ == Self::CHUNK_TYPE, ChunkParseError::InvalidType);
                ensure!(raw.value.len() == 8, ChunkParseError::InvalidLength);
                Ok(Self { timestamp: read_i64_be!(&raw.value[0..8]) })
            }
        }

        impl SerializableTlv for $name {
            fn serialize_to(&self, output: &mut [u8]) {
                let value = write_chunk_header(Self::CHUNK_TYPE, self.value_size(), output);
                write_i64_be!(&mut value[0..8], self.timestamp);
            }

            fn value_size(&self) -> usize {
                8
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}, timestamp={}", $display, self.timestamp)
            }
        }
    };
}

timestamp_chunk!(
    /// Keep-alive, sent when nothing else has been sent for a while.
    HeartbeatChunk,
    0x1002,
    "HEARTBEAT"
);
timestamp_chunk!(
    /// Carries the sender's clock, echoed back in a [`TimestampAckChunk`] to measure the round
    /// trip time.
    TimestampChunk,
    0x1004,
    "TIMESTAMP"
);
timestamp_chunk!(TimestampAckChunk, 0x1005, "TIMESTAMP-ACK");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_from_capture() {
        const BYTES: &[u8] =
            &[0x10, 0x02, 0x00, 0x0c, 0x00, 0x00, 0x01, 0x8f, 0x2a, 0x3b, 0x4c, 0x5d];
        let c = HeartbeatChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        assert_eq!(c.timestamp, 0x0000_018f_2a3b_4c5d);
    }

    #[test]
    fn rejects_truncated_timestamp() {
        const BYTES: &[u8] = &[0x10, 0x04, 0x00, 0x08, 0x00, 0x00, 0x01, 0x8f];
        assert_eq!(
            TimestampChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidLength
        );
    }

    #[test]
    fn serialize_and_deserialize() {
        let chunk = TimestampAckChunk { timestamp: -42 };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        let deserialized =
            TimestampAckChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();

        assert_eq!(deserialized.timestamp, -42);
        assert_eq!(deserialized.to_string(), "TIMESTAMP-ACK, timestamp=-42");
    }
}
