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

use crate::api::MocketTime;
use std::time::Duration;

/// A timer that re-arms itself every time it fires, at a fixed interval from its previous
/// deadline, until it has fired `max_fires` times.
///
/// Timers never fire by themselves. The connection calls [`Timer::fire`] with the current time
/// when it advances its clock, and asks for the [`Timer::deadline`] of every running timer to
/// know when that should happen next.
#[derive(Debug)]
pub struct Timer {
    interval: Duration,
    max_fires: Option<u32>,
    fired: u32,
    deadline: Option<MocketTime>,
}

impl Timer {
    /// Creates a stopped timer. `max_fires` of `None` means that it keeps running until stopped.
    pub fn new(interval: Duration, max_fires: Option<u32>) -> Self {
        Self { interval, max_fires, fired: 0, deadline: None }
    }

    /// A stopped timer that fires once per `interval` until stopped.
    pub fn periodic(interval: Duration) -> Self {
        Self::new(interval, None)
    }

    /// A stopped timer that fires once, `interval` after being started.
    pub fn once(interval: Duration) -> Self {
        Self::new(interval, Some(1))
    }

    /// Returns true if the timer was due at `now`, in which case it's re-armed, or stopped if it
    /// has now fired as many times as allowed.
    pub fn fire(&mut self, now: MocketTime) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.fired = self.fired.saturating_add(1);
                let exhausted = self.max_fires.is_some_and(|max| self.fired >= max);
                self.deadline = (!exhausted && !self.interval.is_zero())
                    .then(|| deadline + self.interval);
                true
            }
            _ => false,
        }
    }

    /// (Re)starts the timer, with its first deadline `interval` from `now`, and resets the
    /// number of times it has fired.
    pub fn start(&mut self, now: MocketTime) {
        self.fired = 0;
        self.deadline = (!self.interval.is_zero()).then(|| now + self.interval);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<MocketTime> {
        self.deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Returns the earliest of the given deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<MocketTime>>) -> Option<MocketTime> {
    deadlines.into_iter().flatten().min()
}
