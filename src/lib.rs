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

//! A reliable, message-oriented transport over UDP, with several delivery flows per
//! connection and connections that can be suspended and resumed from another address.
//!
//! The core is the sans-IO [`api::MocketConnection`], created with [`new_connection`]. The
//! blocking [`api::Mocket`] drives a connection over a [`api::transport::DatagramTransport`].

use crate::api::ErrorKind;
use crate::api::MocketConnection;
use crate::api::Options;
use crate::api::crypto::CryptoProvider;
use crate::connection::Connection;

pub mod api;

pub(crate) mod connection;
pub(crate) mod events;
pub(crate) mod packet;
pub(crate) mod rx;
pub(crate) mod timer;
pub(crate) mod tx;
pub(crate) mod types;

trait EventSink {
    fn add(&mut self, event: api::MocketEvent);
    fn next_event(&mut self) -> Option<api::MocketEvent>;
}

#[cfg(test)]
pub(crate) mod testing;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Creates a new, closed, connection.
///
/// The provided `name` is only used for logging to identify this connection. `crypto` is used
/// to exchange the secret that a suspended connection is resumed with.
pub fn new_connection(
    name: &str,
    options: &Options,
    crypto: Box<dyn CryptoProvider>,
) -> Box<dyn MocketConnection> {
    Box::new(Connection::new(name, options, crypto))
}

/// Restores a connection from the bytes written by [`MocketConnection::freeze`]. The
/// connection is suspended, with its clock restarted at zero.
pub fn defrost_connection(
    name: &str,
    options: &Options,
    crypto: Box<dyn CryptoProvider>,
    mut frozen: &[u8],
) -> Result<Box<dyn MocketConnection>, ErrorKind> {
    let connection = Connection::defrost(name, options, crypto, &mut frozen)?;
    Ok(Box::new(connection))
}

pub(crate) mod logging {
    #[cfg(not(test))]
    use log::info;
    use std::fmt::Write;
    #[cfg(test)]
    use std::println as info;
    use std::string::String;
    use std::time::Duration;

    /// Formats `ts` as a time of day, `hh:mm:ss.mmm`.
    pub fn time_of_day(ts: Duration) -> String {
        let mut remaining = (ts.as_millis() % (24 * 60 * 60 * 1000)) as u64;
        let hours = remaining / (60 * 60 * 1000);
        remaining %= 60 * 60 * 1000;
        let minutes = remaining / (60 * 1000);
        remaining %= 60 * 1000;
        let seconds = remaining / 1000;
        let ms = remaining % 1000;
        format!("{hours:02}:{minutes:02}:{seconds:02}.{ms:03}")
    }

    /// Logs a hex dump of a packet, in a format that text2pcap understands.
    pub fn log_packet(name: &str, ts: Duration, sent: bool, data: &[u8]) {
        let s = data.iter().fold(String::new(), |mut output, c| {
            let _ = write!(output, " {c:02x}");
            output
        });
        let prefix = if sent { "O" } else { "I" };
        info!("{} {} 0000{} # MOCKET_PACKET {}", prefix, time_of_day(ts), s, name);
    }
}
