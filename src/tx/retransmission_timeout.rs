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

use crate::api::Options;
use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use std::time::Duration;

const RTO_ALPHA: f64 = 0.125;
const RTO_BETA: f64 = 0.25;

/// Estimates the round trip time from timestamp and acknowledgement samples, and derives the
/// retransmission timeout (RTO) from it, see <https://datatracker.ietf.org/doc/html/rfc6298>.
pub struct RetransmissionTimeout {
    min_rto: f64,
    max_rto: f64,
    max_rtt: Duration,
    min_rtt_variance: f64,
    first_measurement: bool,
    srtt: f64,
    rtt_var: f64,
    rto: Duration,
}

impl RetransmissionTimeout {
    pub fn new(options: &Options) -> Self {
        let min_rto = options.rto_min.as_secs_f64();
        let max_rto = options.rto_max.map_or(f64::MAX, |d| d.as_secs_f64()).max(min_rto);
        let initial = options.rto_initial.as_secs_f64().clamp(min_rto, max_rto);
        Self {
            min_rto,
            max_rto,
            max_rtt: options.rtt_max,
            min_rtt_variance: options.min_rtt_variance.as_secs_f64(),
            first_measurement: true,
            srtt: options.rto_initial.as_secs_f64(),
            rtt_var: 0.0,
            rto: Duration::from_secs_f64(initial),
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Duration {
        Duration::from_secs_f64(self.srtt)
    }

    /// The RTO of a packet that has been retransmitted `retransmit_count` times, growing by
    /// `backoff_factor` for every retransmission.
    pub fn backed_off(&self, retransmit_count: u32, backoff_factor: u32) -> Duration {
        let factor = backoff_factor.max(1).saturating_pow(retransmit_count);
        let rto = self.rto.as_secs_f64() * factor as f64;
        Duration::from_secs_f64(rto.clamp(self.min_rto, self.max_rto.min(u32::MAX as f64)))
    }

    pub fn observe_rtt(&mut self, measured_rtt: Duration) {
        // A corrupt sample would take a long time to recover from.
        if measured_rtt > self.max_rtt {
            return;
        }
        let rtt = measured_rtt.as_secs_f64();

        if self.first_measurement {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.first_measurement = false;
        } else {
            self.rtt_var = (1.0 - RTO_BETA) * self.rtt_var + RTO_BETA * (self.srtt - rtt).abs();
            self.srtt = (1.0 - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt;
        }

        if self.rtt_var < self.min_rtt_variance {
            self.rtt_var = self.min_rtt_variance;
        }

        let rto = (self.srtt + 4.0 * self.rtt_var).clamp(self.min_rto, self.max_rto);
        self.rto = Duration::from_secs_f64(rto);
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        freezer.put_bool(self.first_measurement);
        freezer.put_u64(self.srtt.to_bits());
        freezer.put_u64(self.rtt_var.to_bits());
    }

    /// Restores the estimate into an estimator created from the current options.
    pub fn defrost(&mut self, defroster: &mut dyn Defroster) -> Result<(), DefrostError> {
        let first_measurement = defroster.get_bool()?;
        let srtt = f64::from_bits(defroster.get_u64()?);
        let rtt_var = f64::from_bits(defroster.get_u64()?);
        if !srtt.is_finite() || srtt < 0.0 || !rtt_var.is_finite() || rtt_var < 0.0 {
            return Err(DefrostError::InvalidValue);
        }
        self.first_measurement = first_measurement;
        self.srtt = srtt;
        self.rtt_var = rtt_var;
        if !first_measurement {
            let rto = (srtt + 4.0 * rtt_var).clamp(self.min_rto, self.max_rto);
            self.rto = Duration::from_secs_f64(rto);
        }
        Ok(())
    }
}
