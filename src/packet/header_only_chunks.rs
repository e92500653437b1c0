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

//! State change chunks that carry no value, only the four byte chunk header.
//!
//! ```txt
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Chunk Type           |          Length = 4           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::ensure;
use std::fmt;

macro_rules! header_only_chunk {
    ($(#[$doc:meta])* $name:ident, $typ:expr, $display:expr) => {
        $(#[$doc])*
        #[derive(Debug, Default, PartialEq)]
        pub struct $name {}

        impl $name {
            pub(crate) const CHUNK_TYPE: u16 = $typ;
        }

        impl TryFrom<RawChunk<'_>> for $name {
            type Error = ChunkParseError;

            fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
                ensure!(raw.typ == Self::CHUNK_TYPE, ChunkParseError::InvalidType);
                ensure!(raw.value.is_empty(), ChunkParseError::InvalidLength);
                Ok(Self {})
            }
        }

        impl SerializableTlv for $name {
            fn serialize_to(&self, output: &mut [u8]) {
                write_chunk_header(Self::CHUNK_TYPE, self.value_size(), output);
            }

            fn value_size(&self) -> usize {
                0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str($display)
            }
        }
    };
}

header_only_chunk!(
    /// Starts a graceful shutdown, sent once all outstanding reliable data has been acknowledged.
    ShutdownChunk,
    0x4005,
    "SHUTDOWN"
);
header_only_chunk!(ShutdownAckChunk, 0x4006, "SHUTDOWN-ACK");
header_only_chunk!(ShutdownCompleteChunk, 0x4007, "SHUTDOWN-COMPLETE");
header_only_chunk!(
    /// Immediately tears down the connection. Never acknowledged.
    AbortChunk,
    0x4008,
    "ABORT"
);
header_only_chunk!(ResumeAckChunk, 0x400C, "RESUME-ACK");
header_only_chunk!(ReEstablishAckChunk, 0x400E, "REESTABLISH-ACK");
header_only_chunk!(
    /// Suspends the connection without any key exchange. Only usable when both sides already
    /// share a secret.
    SimpleSuspendChunk,
    0x400F,
    "SIMPLE-SUSPEND"
);
header_only_chunk!(SimpleSuspendAckChunk, 0x4010, "SIMPLE-SUSPEND-ACK");
