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

use thiserror::Error;

pub(crate) mod cancelled_chunk;
pub(crate) mod chunk;
pub(crate) mod cookie_ack_chunk;
pub(crate) mod cookie_echo_chunk;
pub(crate) mod data_chunk;
pub(crate) mod header_only_chunks;
pub(crate) mod init_chunk;
pub(crate) mod mocket_packet;
pub(crate) mod opaque_chunks;
pub(crate) mod sack_chunk;
pub(crate) mod simple_connect_chunk;
pub(crate) mod timestamp_chunks;
pub(crate) mod tsn_blocks;
pub(crate) mod unknown_chunk;

/// Size of the chunk header: a 16-bit type followed by a 16-bit length.
pub(crate) const TLV_HEADER_SIZE: usize = 4;

/// Returns early with `$err` unless `$cond` holds.
macro_rules! ensure {
    ($cond: expr, $err: expr) => {
        if !$cond {
            return Err($err.into());
        }
    };
}

macro_rules! read_u16_be {
    ($buf: expr) => {
        u16::from_be_bytes($buf[..2].try_into().unwrap())
    };
}

macro_rules! read_u32_be {
    ($buf: expr) => {
        u32::from_be_bytes($buf[..4].try_into().unwrap())
    };
}

macro_rules! read_u64_be {
    ($buf: expr) => {
        u64::from_be_bytes($buf[..8].try_into().unwrap())
    };
}

macro_rules! write_u16_be {
    ($buf: expr, $n: expr) => {
        $buf[..2].copy_from_slice(&($n as u16).to_be_bytes());
    };
}

macro_rules! write_u32_be {
    ($buf: expr, $n: expr) => {
        $buf[..4].copy_from_slice(&($n as u32).to_be_bytes());
    };
}

macro_rules! write_u64_be {
    ($buf: expr, $n: expr) => {
        $buf[..8].copy_from_slice(&($n as u64).to_be_bytes());
    };
}

macro_rules! read_i64_be {
    ($buf: expr) => {
        i64::from_be_bytes($buf[..8].try_into().unwrap())
    };
}

macro_rules! write_i64_be {
    ($buf: expr, $n: expr) => {
        $buf[..8].copy_from_slice(&($n as i64).to_be_bytes());
    };
}

pub(crate) use ensure;
pub(crate) use read_i64_be;
pub(crate) use read_u16_be;
pub(crate) use read_u32_be;
pub(crate) use read_u64_be;
pub(crate) use write_i64_be;
pub(crate) use write_u16_be;
pub(crate) use write_u32_be;
pub(crate) use write_u64_be;

/// Trait for serialization/deserialization methods on chunks, which all share the same framing
/// but carry different values.
pub(crate) trait SerializableTlv {
    /// Serializes this chunk to a byte array. Callers are expected to call
    /// [`Self::serialized_size`] prior to calling this method, to ensure that `output` is large
    /// enough.
    fn serialize_to(&self, output: &mut [u8]);

    /// Returns how many bytes of value payload this chunk has, which together with the chunk
    /// header size becomes the full serialized size.
    fn value_size(&self) -> usize;

    /// Returns the number of bytes this chunk serializes to.
    fn serialized_size(&self) -> usize {
        TLV_HEADER_SIZE + self.value_size()
    }
}

/// Trait for enums that carry objects that implement [`SerializableTlv`].
pub trait AsSerializableTlv {
    fn as_serializable(&self) -> &dyn SerializableTlv;
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ChunkParseError {
    #[error("The chunk has an invalid length field, or payload size")]
    InvalidLength,

    #[error("Unexpected chunk type")]
    InvalidType,

    #[error("Invalid value")]
    InvalidValue,
}

/// Returned when a chunk or record doesn't fit in the space that is left. Callers may discard
/// the partially filled builder, or send it as is.
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error("Insufficient space")]
    InsufficientSpace,
}
