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

use std::cmp::Ordering;
use std::fmt;

/// See <https://datatracker.ietf.org/doc/html/rfc1982#section-3.2>.
fn cmp_rfc1982_u32(a: u32, b: u32) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if (a < b && (b - a) < (1 << 31)) || (a > b && (a - b) > (1 << 31)) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// The delivery flows multiplexed within a single connection. Each flow has its own TSN space.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Flow {
    /// Reliable, sequenced, used by the connection itself.
    Control,
    ReliableSequenced,
    ReliableUnsequenced,
    UnreliableSequenced,
    UnreliableUnsequenced,
}

impl Flow {
    pub const ALL: [Flow; 5] = [
        Flow::Control,
        Flow::ReliableSequenced,
        Flow::ReliableUnsequenced,
        Flow::UnreliableSequenced,
        Flow::UnreliableUnsequenced,
    ];

    pub fn from(reliable: bool, sequenced: bool) -> Self {
        match (reliable, sequenced) {
            (true, true) => Flow::ReliableSequenced,
            (true, false) => Flow::ReliableUnsequenced,
            (false, true) => Flow::UnreliableSequenced,
            (false, false) => Flow::UnreliableUnsequenced,
        }
    }

    pub fn is_reliable(&self) -> bool {
        matches!(self, Flow::Control | Flow::ReliableSequenced | Flow::ReliableUnsequenced)
    }

    pub fn is_sequenced(&self) -> bool {
        matches!(self, Flow::Control | Flow::ReliableSequenced | Flow::UnreliableSequenced)
    }

    /// The code used for this flow in frozen state.
    pub(crate) fn code(&self) -> u8 {
        match self {
            Flow::Control => 0,
            Flow::ReliableSequenced => 1,
            Flow::ReliableUnsequenced => 2,
            Flow::UnreliableSequenced => 3,
            Flow::UnreliableUnsequenced => 4,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Flow::Control => "control",
            Flow::ReliableSequenced => "reliable-sequenced",
            Flow::ReliableUnsequenced => "reliable-unsequenced",
            Flow::UnreliableSequenced => "unreliable-sequenced",
            Flow::UnreliableUnsequenced => "unreliable-unsequenced",
        };
        f.write_str(s)
    }
}

/// Transmission Sequence Number (TSN)
///
/// Every flow of a connection numbers its packets in its own TSN space. Values wrap around at
/// 2^32, and all comparisons between TSNs use serial number arithmetic.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Tsn(pub u32);

impl fmt::Debug for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::cmp::PartialOrd for Tsn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Tsn {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_rfc1982_u32(self.0, other.0)
    }
}

impl std::ops::Add<u32> for Tsn {
    type Output = Tsn;

    #[inline]
    fn add(self, rhs: u32) -> Tsn {
        Tsn(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Sub<u32> for Tsn {
    type Output = Tsn;

    #[inline]
    fn sub(self, rhs: u32) -> Tsn {
        Tsn(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::AddAssign<u32> for Tsn {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Tsn {
    pub fn distance_to(self, other: Tsn) -> u32 {
        if self > other {
            self.0.wrapping_sub(other.0)
        } else {
            other.0.wrapping_sub(self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_U32: u32 = u32::MAX;

    #[test]
    fn tsn_cmp() {
        assert!(Tsn(42) == Tsn(42));
        assert!(Tsn(44) > Tsn(0));
        assert!(Tsn(200) < Tsn(255));
        assert!(Tsn(0) > Tsn(MAX_U32));
        assert!(Tsn(MAX_U32) < Tsn(44));
    }

    #[test]
    fn tsn_wraps_when_incremented() {
        let mut tsn = Tsn(MAX_U32 - 1);
        tsn += 1;
        assert_eq!(tsn, Tsn(MAX_U32));
        tsn += 1;
        assert_eq!(tsn, Tsn(0));
        assert_eq!(tsn - 1, Tsn(MAX_U32));
        assert_eq!(Tsn(MAX_U32) + 2, Tsn(1));
    }

    #[test]
    fn tsn_distance_is_symmetric_across_wraparound() {
        assert_eq!(Tsn(MAX_U32 - 1).distance_to(Tsn(1)), 3);
        assert_eq!(Tsn(1).distance_to(Tsn(MAX_U32 - 1)), 3);
        assert_eq!(Tsn(100).distance_to(Tsn(100)), 0);
        assert_eq!(Tsn(5100).distance_to(Tsn(5100 + 65536)), 65536);
    }

    #[test]
    fn tsn_cmp_near_wraparound() {
        assert!(Tsn(0xFFFF_FFFE) < Tsn(1));
        assert!(Tsn(1) > Tsn(0xFFFF_FFFE));
        assert!(Tsn(0xFFFF_FFFE) <= Tsn(0xFFFF_FFFE));
        assert!(Tsn(0xFFFF_FFFF) >= Tsn(0xFFFF_FFFE));
        // Plain integer comparison disagrees.
        assert!(0xFFFF_FFFE_u32 > 1);
    }

    #[test]
    fn flow_from_flags() {
        assert_eq!(Flow::from(true, true), Flow::ReliableSequenced);
        assert_eq!(Flow::from(true, false), Flow::ReliableUnsequenced);
        assert_eq!(Flow::from(false, true), Flow::UnreliableSequenced);
        assert_eq!(Flow::from(false, false), Flow::UnreliableUnsequenced);
        assert!(Flow::Control.is_reliable());
        assert!(Flow::Control.is_sequenced());
        assert!(!Flow::UnreliableSequenced.is_reliable());
    }

    #[test]
    fn flow_codes() {
        for flow in Flow::ALL {
            assert_eq!(Flow::from_code(flow.code()), Some(flow));
        }
        assert_eq!(Flow::from_code(5), None);
    }
}
