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

//! Sets of TSNs, stored as sorted lists of inclusive intervals.
//!
//! Intervals are kept strictly ordered and are never overlapping or adjacent, so that a set
//! of contiguous TSNs is always represented by a single interval.

use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use crate::packet::tsn_blocks::TsnBlocks;
use crate::types::Tsn;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TsnRangeHandler {
    intervals: Vec<(Tsn, Tsn)>,
}

impl TsnRangeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tsn` to the set. Returns `true` if it was not already present.
    pub fn add_tsn(&mut self, tsn: Tsn) -> bool {
        let idx = self.intervals.partition_point(|&(begin, _)| begin <= tsn);

        if idx > 0 && self.intervals[idx - 1].1 >= tsn {
            return false;
        }

        let extend_prev = idx > 0 && self.intervals[idx - 1].1 + 1 == tsn;
        let extend_next = idx < self.intervals.len() && self.intervals[idx].0 == tsn + 1;

        match (extend_prev, extend_next) {
            (true, true) => {
                self.intervals[idx - 1].1 = self.intervals[idx].1;
                self.intervals.remove(idx);
            }
            (true, false) => self.intervals[idx - 1].1 = tsn,
            (false, true) => self.intervals[idx].0 = tsn,
            (false, false) => self.intervals.insert(idx, (tsn, tsn)),
        }
        true
    }

    pub fn contains(&self, tsn: Tsn) -> bool {
        let idx = self.intervals.partition_point(|&(begin, _)| begin <= tsn);
        idx > 0 && self.intervals[idx - 1].1 >= tsn
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[(Tsn, Tsn)] {
        &self.intervals
    }

    pub fn reset(&mut self) {
        self.intervals.clear();
    }

    /// Removes every TSN less than or equal to `tsn`, truncating an interval that spans it.
    pub(crate) fn delete_tsns_up_to(&mut self, tsn: Tsn) {
        let idx = self.intervals.partition_point(|&(_, end)| end <= tsn);
        self.intervals.drain(..idx);
        if let Some(first) = self.intervals.first_mut() {
            if first.0 <= tsn {
                first.0 = tsn + 1;
            }
        }
    }

    /// Removes the first interval if it starts right after `tsn`, and returns its end.
    fn take_if_follows(&mut self, tsn: Tsn) -> Option<Tsn> {
        match self.intervals.first() {
            Some(&(begin, end)) if begin == tsn + 1 => {
                self.intervals.remove(0);
                Some(end)
            }
            _ => None,
        }
    }

    /// Returns all intervals of more than one TSN as ranges, and the rest as singles.
    pub fn blocks(&self) -> TsnBlocks {
        let (ranges, singles): (Vec<_>, Vec<_>) =
            self.intervals.iter().copied().partition(|(begin, end)| begin != end);
        TsnBlocks { ranges, singles: singles.into_iter().map(|(tsn, _)| tsn).collect() }
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        for &(begin, end) in &self.intervals {
            freezer.put_u8(1);
            freezer.put_u32(begin.0);
            freezer.put_u32(end.0);
        }
        freezer.put_u8(0);
    }

    pub fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        let mut intervals: Vec<(Tsn, Tsn)> = Vec::new();
        while defroster.get_bool()? {
            let begin = Tsn(defroster.get_u32()?);
            let end = Tsn(defroster.get_u32()?);
            if end < begin || intervals.last().is_some_and(|&(_, prev)| prev + 1 >= begin) {
                return Err(DefrostError::InvalidValue);
            }
            intervals.push((begin, end));
        }
        Ok(Self { intervals })
    }
}

/// Tracks TSNs that have been cancelled by the sender, and not yet acknowledged by the peer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CancelledRangeHandler {
    ranges: TsnRangeHandler,
}

impl CancelledRangeHandler {
    pub fn add_tsn(&mut self, tsn: Tsn) -> bool {
        self.ranges.add_tsn(tsn)
    }

    pub fn delete_tsns_up_to(&mut self, tsn: Tsn) {
        self.ranges.delete_tsns_up_to(tsn)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn blocks(&self) -> TsnBlocks {
        self.ranges.blocks()
    }

    pub fn reset(&mut self) {
        self.ranges.reset()
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        self.ranges.freeze(freezer)
    }

    pub fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        Ok(Self { ranges: TsnRangeHandler::defrost(defroster)? })
    }
}

/// Tracks received TSNs as a cumulative TSN, which all TSNs up to and including it have been
/// received, and the intervals received beyond it.
#[derive(Clone, Debug, PartialEq)]
pub struct SackRangeHandler {
    cumulative_tsn: Tsn,
    ranges: TsnRangeHandler,
}

impl Default for SackRangeHandler {
    fn default() -> Self {
        Self { cumulative_tsn: Tsn(0), ranges: TsnRangeHandler::new() }
    }
}

impl SackRangeHandler {
    /// Creates a handler expecting `initial_tsn` as the first TSN.
    pub fn new(initial_tsn: Tsn) -> Self {
        let mut handler = Self::default();
        handler.set_cumulative_tsn(initial_tsn - 1);
        handler
    }

    pub fn set_cumulative_tsn(&mut self, tsn: Tsn) {
        self.cumulative_tsn = tsn;
        self.ranges.delete_tsns_up_to(tsn);
    }

    pub fn cumulative_tsn(&self) -> Tsn {
        self.cumulative_tsn
    }

    /// Returns `true` if `tsn` was not received before.
    pub fn add_tsn(&mut self, tsn: Tsn) -> bool {
        if tsn <= self.cumulative_tsn {
            return false;
        }
        let added = self.ranges.add_tsn(tsn);
        if let Some(end) = self.ranges.take_if_follows(self.cumulative_tsn) {
            self.cumulative_tsn = end;
        }
        added
    }

    pub fn contains(&self, tsn: Tsn) -> bool {
        tsn <= self.cumulative_tsn || self.ranges.contains(tsn)
    }

    /// Intervals received beyond the cumulative TSN.
    pub fn blocks(&self) -> TsnBlocks {
        self.ranges.blocks()
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        freezer.put_u32(self.cumulative_tsn.0);
        self.ranges.freeze(freezer);
    }

    pub fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        let cumulative_tsn = Tsn(defroster.get_u32()?);
        let ranges = TsnRangeHandler::defrost(defroster)?;
        if ranges.intervals().first().is_some_and(|&(begin, _)| begin <= cumulative_tsn + 1) {
            return Err(DefrostError::InvalidValue);
        }
        Ok(Self { cumulative_tsn, ranges })
    }
}

/// Remembers which message ids of an unsequenced flow have already been received, to discard
/// duplicates.
///
/// Id zero is tracked separately, as it's the value that the cumulative id is initialized to,
/// and would otherwise always be considered received.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReceivedRangeHandler {
    received: SackRangeHandler,
    received_tsn_zero: bool,
}

impl ReceivedRangeHandler {
    pub fn new(initial_tsn: Tsn) -> Self {
        Self { received: SackRangeHandler::new(initial_tsn), received_tsn_zero: false }
    }

    /// Returns `true` if `tsn` was not received before.
    pub fn add_tsn(&mut self, tsn: Tsn) -> bool {
        let added = !self.already_received(tsn);
        if tsn == Tsn(0) {
            self.received_tsn_zero = true;
        }
        self.received.add_tsn(tsn);
        added
    }

    pub fn already_received(&self, tsn: Tsn) -> bool {
        if tsn == Tsn(0) {
            return self.received_tsn_zero;
        }
        self.received.contains(tsn)
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        freezer.put_u32(self.received.cumulative_tsn.0);
        freezer.put_bool(self.received_tsn_zero);
        self.received.ranges.freeze(freezer);
    }

    pub fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        let cumulative_tsn = Tsn(defroster.get_u32()?);
        let received_tsn_zero = defroster.get_bool()?;
        let ranges = TsnRangeHandler::defrost(defroster)?;
        Ok(Self { received: SackRangeHandler { cumulative_tsn, ranges }, received_tsn_zero })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rand::seq::SliceRandom;

    fn intervals(handler: &TsnRangeHandler) -> Vec<(u32, u32)> {
        handler.intervals().iter().map(|(b, e)| (b.0, e.0)).collect()
    }

    fn add_all(handler: &mut TsnRangeHandler, tsns: &[u32]) {
        for tsn in tsns {
            handler.add_tsn(Tsn(*tsn));
        }
    }

    #[test]
    fn empty() {
        let handler = TsnRangeHandler::new();
        assert!(handler.is_empty());
        assert!(handler.blocks().is_empty());
    }

    #[test]
    fn add_single() {
        let mut handler = TsnRangeHandler::new();
        assert!(handler.add_tsn(Tsn(12)));
        assert_eq!(intervals(&handler), vec![(12, 12)]);
    }

    #[test]
    fn add_is_idempotent() {
        let mut handler = TsnRangeHandler::new();
        add_all(&mut handler, &[12, 13, 14]);
        assert!(!handler.add_tsn(Tsn(13)));
        assert!(!handler.add_tsn(Tsn(12)));
        assert_eq!(intervals(&handler), vec![(12, 14)]);
    }

    #[test]
    fn expands_to_left_and_right() {
        let mut handler = TsnRangeHandler::new();
        add_all(&mut handler, &[12, 20]);
        handler.add_tsn(Tsn(11));
        handler.add_tsn(Tsn(21));
        assert_eq!(intervals(&handler), vec![(11, 12), (20, 21)]);
    }

    #[test]
    fn merges_when_gap_is_filled() {
        let mut handler = TsnRangeHandler::new();
        add_all(&mut handler, &[12, 14, 16, 13]);
        assert_eq!(intervals(&handler), vec![(12, 14), (16, 16)]);
        handler.add_tsn(Tsn(15));
        assert_eq!(intervals(&handler), vec![(12, 16)]);
    }

    #[test]
    fn shuffled_tsns_collapse_to_one_interval() {
        let mut tsns: Vec<u32> = (1..=100).collect();
        tsns.shuffle(&mut rand::rng());

        let mut handler = TsnRangeHandler::new();
        add_all(&mut handler, &tsns);
        assert_eq!(intervals(&handler), vec![(1, 100)]);
    }

    #[test]
    fn every_insertion_order_yields_minimal_intervals() {
        for order in [1u32, 2, 3, 5, 6].into_iter().permutations(5) {
            let mut handler = TsnRangeHandler::new();
            add_all(&mut handler, &order);
            assert_eq!(intervals(&handler), vec![(1, 3), (5, 6)], "order {order:?}");
        }
    }

    #[test]
    fn contains() {
        let mut handler = TsnRangeHandler::new();
        add_all(&mut handler, &[5, 6, 7, 10]);
        assert!(handler.contains(Tsn(6)));
        assert!(handler.contains(Tsn(10)));
        assert!(!handler.contains(Tsn(8)));
        assert!(!handler.contains(Tsn(4)));
    }

    #[test]
    fn blocks_lists_ranges_then_singles() {
        let mut handler = TsnRangeHandler::new();
        add_all(&mut handler, &[12, 13, 14, 16, 18, 19, 20, 21, 22, 23, 24, 25, 27, 28, 32]);
        let blocks = handler.blocks();
        assert_eq!(
            blocks.ranges,
            vec![(Tsn(12), Tsn(14)), (Tsn(18), Tsn(25)), (Tsn(27), Tsn(28))]
        );
        assert_eq!(blocks.singles, vec![Tsn(16), Tsn(32)]);
    }

    #[test]
    fn handles_wraparound() {
        let mut handler = TsnRangeHandler::new();
        add_all(&mut handler, &[0xFFFF_FFFE, 1, 0xFFFF_FFFF, 0]);
        assert_eq!(intervals(&handler), vec![(0xFFFF_FFFE, 1)]);
        assert!(handler.contains(Tsn(0)));
    }

    #[test]
    fn cancelled_delete_up_to() {
        let mut handler = CancelledRangeHandler::default();
        for tsn in [3, 4, 5, 8, 10, 11, 12] {
            handler.add_tsn(Tsn(tsn));
        }
        handler.delete_tsns_up_to(Tsn(4));
        assert_eq!(intervals(&handler.ranges), vec![(5, 5), (8, 8), (10, 12)]);
        handler.delete_tsns_up_to(Tsn(10));
        assert_eq!(intervals(&handler.ranges), vec![(11, 12)]);
        handler.delete_tsns_up_to(Tsn(100));
        assert!(handler.is_empty());
    }

    #[test]
    fn sack_handler_absorbs_first_interval() {
        let mut handler = SackRangeHandler::new(Tsn(10));
        assert_eq!(handler.cumulative_tsn(), Tsn(9));
        assert!(handler.add_tsn(Tsn(11)));
        assert!(handler.add_tsn(Tsn(12)));
        assert_eq!(handler.cumulative_tsn(), Tsn(9));
        assert_eq!(handler.blocks().ranges, vec![(Tsn(11), Tsn(12))]);

        assert!(handler.add_tsn(Tsn(10)));
        assert_eq!(handler.cumulative_tsn(), Tsn(12));
        assert!(handler.blocks().is_empty());
        assert!(!handler.add_tsn(Tsn(10)));
        assert!(!handler.add_tsn(Tsn(5)));
    }

    #[test]
    fn cumulative_tsn_never_decreases() {
        let mut tsns: Vec<u32> = (1..=200).collect();
        tsns.shuffle(&mut rand::rng());

        let mut handler = SackRangeHandler::new(Tsn(1));
        let mut last = handler.cumulative_tsn();
        for tsn in tsns {
            handler.add_tsn(Tsn(tsn));
            assert!(handler.cumulative_tsn() >= last);
            last = handler.cumulative_tsn();
        }
        assert_eq!(last, Tsn(200));
        assert!(handler.blocks().is_empty());
    }

    #[test]
    fn sack_handler_wraps_around() {
        let mut handler = SackRangeHandler::new(Tsn(0xFFFF_FFFE));
        handler.add_tsn(Tsn(0));
        handler.add_tsn(Tsn(0xFFFF_FFFF));
        assert_eq!(handler.cumulative_tsn(), Tsn(0xFFFF_FFFD));
        handler.add_tsn(Tsn(0xFFFF_FFFE));
        assert_eq!(handler.cumulative_tsn(), Tsn(0));
    }

    #[test]
    fn received_handler_tracks_tsn_zero() {
        let mut handler = ReceivedRangeHandler::default();
        assert!(!handler.already_received(Tsn(0)));
        assert!(handler.add_tsn(Tsn(0)));
        assert!(handler.already_received(Tsn(0)));
        assert!(!handler.add_tsn(Tsn(0)));

        assert!(!handler.already_received(Tsn(2)));
        assert!(handler.add_tsn(Tsn(2)));
        assert!(handler.already_received(Tsn(2)));
        assert!(!handler.already_received(Tsn(1)));
    }

    #[test]
    fn received_handler_detects_duplicates() {
        let mut handler = ReceivedRangeHandler::new(Tsn(100));
        assert!(handler.add_tsn(Tsn(101)));
        assert!(handler.add_tsn(Tsn(100)));
        assert!(!handler.add_tsn(Tsn(101)));
        assert!(handler.already_received(Tsn(99)));
    }

    #[test]
    fn freeze_and_defrost() {
        let mut handler = SackRangeHandler::new(Tsn(10));
        for tsn in [10, 11, 13, 15, 16] {
            handler.add_tsn(Tsn(tsn));
        }
        let mut frozen: Vec<u8> = Vec::new();
        handler.freeze(&mut frozen);
        assert_eq!(frozen.len(), 4 + 9 + 9 + 1);

        let mut defroster: &[u8] = &frozen;
        assert_eq!(SackRangeHandler::defrost(&mut defroster).unwrap(), handler);
        assert!(defroster.is_empty());
    }

    #[test]
    fn freeze_and_defrost_received_handler() {
        let mut handler = ReceivedRangeHandler::default();
        for tsn in [0, 3, 4] {
            handler.add_tsn(Tsn(tsn));
        }
        let mut frozen: Vec<u8> = Vec::new();
        handler.freeze(&mut frozen);

        let mut defroster: &[u8] = &frozen;
        let defrosted = ReceivedRangeHandler::defrost(&mut defroster).unwrap();
        assert_eq!(defrosted, handler);
        assert!(defrosted.already_received(Tsn(0)));
        assert!(defrosted.already_received(Tsn(4)));
    }

    #[test]
    fn defrost_rejects_overlapping_intervals() {
        let mut frozen: Vec<u8> = Vec::new();
        frozen.put_u8(1);
        frozen.put_u32(5);
        frozen.put_u32(8);
        frozen.put_u8(1);
        frozen.put_u32(7);
        frozen.put_u32(9);
        frozen.put_u8(0);

        let mut defroster: &[u8] = &frozen;
        assert_eq!(TsnRangeHandler::defrost(&mut defroster), Err(DefrostError::InvalidValue));
    }
}
