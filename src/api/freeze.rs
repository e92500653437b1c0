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

//! Serialization of connection state, used to move a suspended connection between processes.
//!
//! Values are written in big-endian byte order without any framing, so the reader must read
//! them back in the same order as they were written.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum DefrostError {
    #[error("Unexpected end of frozen state")]
    UnexpectedEnd,

    #[error("Invalid value in frozen state")]
    InvalidValue,
}

/// Sink for frozen state.
pub trait Freezer {
    fn put_bytes_raw(&mut self, data: &[u8]);

    fn put_u8(&mut self, value: u8) {
        self.put_bytes_raw(&[value]);
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_u16(&mut self, value: u16) {
        self.put_bytes_raw(&value.to_be_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.put_bytes_raw(&value.to_be_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.put_bytes_raw(&value.to_be_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.put_bytes_raw(&value.to_be_bytes());
    }

    /// Writes a length-prefixed byte string.
    fn put_bytes(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.put_bytes_raw(data);
    }
}

/// Source of frozen state.
pub trait Defroster {
    fn get_bytes_raw(&mut self, len: usize) -> Result<&[u8], DefrostError>;

    fn get_u8(&mut self) -> Result<u8, DefrostError> {
        Ok(self.get_bytes_raw(1)?[0])
    }

    fn get_bool(&mut self) -> Result<bool, DefrostError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DefrostError::InvalidValue),
        }
    }

    fn get_u16(&mut self) -> Result<u16, DefrostError> {
        let b = self.get_bytes_raw(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn get_u32(&mut self) -> Result<u32, DefrostError> {
        let b = self.get_bytes_raw(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn get_u64(&mut self) -> Result<u64, DefrostError> {
        let b = self.get_bytes_raw(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn get_i64(&mut self) -> Result<i64, DefrostError> {
        Ok(self.get_u64()? as i64)
    }

    fn get_bytes(&mut self) -> Result<Vec<u8>, DefrostError> {
        let len = self.get_u32()? as usize;
        Ok(self.get_bytes_raw(len)?.to_vec())
    }
}

impl Freezer for Vec<u8> {
    fn put_bytes_raw(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

impl<'a> Defroster for &'a [u8] {
    fn get_bytes_raw(&mut self, len: usize) -> Result<&[u8], DefrostError> {
        let data: &'a [u8] = *self;
        if data.len() < len {
            return Err(DefrostError::UnexpectedEnd);
        }
        let (head, tail) = data.split_at(len);
        *self = tail;
        Ok(head)
    }
}
