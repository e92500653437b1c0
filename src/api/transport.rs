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

//! The datagram transport that a [`crate::api::Mocket`] sends and receives packets on.

use anyhow::Context;
use std::io;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::net::UdpSocket;
use std::time::Duration;

/// An unreliable, connectionless, datagram transport.
pub trait DatagramTransport: Send + Sync {
    fn send_to(&self, packet: &[u8], to: SocketAddr) -> io::Result<usize>;

    /// Waits up to `timeout` for a datagram. Returns `Ok(None)` if none arrived in time.
    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// [`DatagramTransport`] over a UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).context("Failed to bind UDP socket")?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl DatagramTransport for UdpTransport {
    fn send_to(&self, packet: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(packet, to)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        // A zero duration means "block forever" to the socket.
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_times_out_without_data() {
        let transport = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut buf = [0; 64];
        assert!(transport.recv_from(&mut buf, Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn sends_and_receives_datagrams() {
        let a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").unwrap();
        a.send_to(&[1, 2, 3], b.local_addr().unwrap()).unwrap();

        let mut buf = [0; 64];
        let (len, from) = b.recv_from(&mut buf, Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        assert_eq!(from, a.local_addr().unwrap());
    }
}
