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

//! State change chunks whose value is an opaque byte string, used by the suspend and resume
//! exchanges. The bytes are either key material or data encrypted by the crypto provider; the
//! codec never interprets them.
//!
//! ```txt
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Chunk Type           |         Chunk Length          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! \                                                               \
//! /                          Opaque data                          /
//! \                                                               \
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::ensure;
use std::fmt;

macro_rules! opaque_chunk {
    ($(#[$doc:meta])* $name:ident, $field:ident, $typ:expr, $display:expr) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq)]
        pub struct $name {
            pub $field: Vec<u8>,
        }

        impl $name {
            pub(crate) const CHUNK_TYPE: u16 = $typ;
        }

        impl TryFrom<RawChunk<'_>> for $name {
            type Error = ChunkParseError;

            fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
                ensure!(raw.typ == Self::CHUNK_TYPE, ChunkParseError::InvalidType);
                Ok(Self { $field: raw.value.to_vec() })
            }
        }

        impl SerializableTlv for $name {
            fn serialize_to(&self, output: &mut [u8]) {
                let value = write_chunk_header(Self::CHUNK_TYPE, self.value_size(), output);
                value.copy_from_slice(&self.$field);
            }

            fn value_size(&self) -> usize {
                self.$field.len()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}, {} bytes", $display, self.$field.len())
            }
        }
    };
}

opaque_chunk!(
    /// Requests suspension. Carries the sender's public key when no secret has been exchanged
    /// yet, and is empty otherwise.
    SuspendChunk,
    key_data,
    0x4009,
    "SUSPEND"
);
opaque_chunk!(
    /// Accepts a suspension. Carries the session secret encrypted with the public key from the
    /// SUSPEND chunk, if there was one.
    SuspendAckChunk,
    encrypted_secret,
    0x400A,
    "SUSPEND-ACK"
);
opaque_chunk!(
    /// Resumes a suspended connection, possibly from a new address.
    ResumeChunk,
    encrypted_nonce,
    0x400B,
    "RESUME"
);
opaque_chunk!(
    /// Re-attaches to an established connection after an abrupt disconnection.
    ReEstablishChunk,
    encrypted_nonce,
    0x400D,
    "REESTABLISH"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_from_capture() {
        const BYTES: &[u8] = &[0x40, 0x0b, 0x00, 0x07, 0xde, 0xad, 0x01];
        let c = ResumeChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        assert_eq!(c.encrypted_nonce, vec![0xde, 0xad, 0x01]);
    }

    #[test]
    fn empty_suspend_is_valid() {
        const BYTES: &[u8] = &[0x40, 0x09, 0x00, 0x04];
        let c = SuspendChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        assert!(c.key_data.is_empty());
    }

    #[test]
    fn serialize_and_deserialize() {
        let chunk = SuspendAckChunk { encrypted_secret: vec![1, 2, 3, 4, 5] };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        let deserialized =
            SuspendAckChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();

        assert_eq!(deserialized, chunk);
        assert_eq!(chunk.to_string(), "SUSPEND-ACK, 5 bytes");
    }

    #[test]
    fn rejects_other_type() {
        let chunk = ReEstablishChunk { encrypted_nonce: vec![9] };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(
            ResumeChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidType
        );
    }
}
