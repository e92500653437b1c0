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

//! A blocking driver for a [`Connection`], running it over a [`DatagramTransport`].
//!
//! The connection is owned by a worker thread that also transmits its packets and services
//! its timers. A second thread receives datagrams and hands them to the worker. Application
//! calls are forwarded to the worker and wait, with a deadline, on a condition variable for
//! the connection to reach the expected state.

use crate::api::ConnectionState;
use crate::api::ErrorKind;
use crate::api::Message;
use crate::api::Metrics;
use crate::api::MocketConnection;
use crate::api::MocketEvent;
use crate::api::MocketTime;
use crate::api::Options;
use crate::api::SendStatus;
use crate::api::crypto::CryptoProvider;
use crate::api::transport::DatagramTransport;
use crate::api::transport::UdpTransport;
use crate::connection::Connection;
use crate::types::Flow;
use anyhow::Context as _;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

/// The largest datagram that can be received.
const MAX_DATAGRAM_SIZE: usize = 65_536;

type Reply = Box<dyn FnOnce() + Send>;
type Command = Box<dyn FnOnce(&mut Connection) -> Reply + Send>;

enum Input {
    Datagram(SocketAddr, Vec<u8>),
    Command(Command),
    TransportFailed(String),
    Stop,
}

/// What the application threads can see of the connection, as last published by the worker.
struct Snapshot {
    state: ConnectionState,
    remote_addr: Option<SocketAddr>,
    metrics: Option<Metrics>,
    messages: VecDeque<Message>,

    /// Why the connection last failed or was aborted.
    failure: Option<ErrorKind>,

    running: bool,
}

struct Shared {
    snapshot: Mutex<Snapshot>,
    changed: Condvar,
    stop: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits until `done` holds, or fails with [`ErrorKind::Timeout`] after `timeout`.
    fn wait_until(
        &self,
        timeout: Duration,
        mut done: impl FnMut(&Snapshot) -> bool,
    ) -> Result<MutexGuard<'_, Snapshot>, ErrorKind> {
        let (guard, result) = self
            .changed
            .wait_timeout_while(self.lock(), timeout, |s| !done(s))
            .unwrap_or_else(|e| e.into_inner());
        if result.timed_out() { Err(ErrorKind::Timeout) } else { Ok(guard) }
    }
}

/// A mockets connection with a blocking API.
pub struct Mocket {
    name: String,
    options: Options,
    transport: Arc<dyn DatagramTransport>,
    shared: Arc<Shared>,
    input: mpsc::Sender<Input>,
    worker: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl Mocket {
    /// Creates a closed connection on a UDP socket bound to `addr`.
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        name: &str,
        options: &Options,
        crypto: Box<dyn CryptoProvider>,
    ) -> anyhow::Result<Mocket> {
        let transport = Arc::new(UdpTransport::bind(addr)?);
        Self::new(transport, name, options, crypto)
    }

    /// Creates a closed connection on `transport`.
    pub fn new(
        transport: Arc<dyn DatagramTransport>,
        name: &str,
        options: &Options,
        crypto: Box<dyn CryptoProvider>,
    ) -> anyhow::Result<Mocket> {
        let (name_, options_) = (name.to_string(), options.clone());
        Self::start(transport, name, options, move || {
            Ok(Connection::new(&name_, &options_, crypto))
        })
    }

    /// Restores a connection frozen by [`Mocket::freeze`]. It's suspended, and can be
    /// resumed with [`Mocket::resume`] from the address of `transport`.
    pub fn defrost(
        transport: Arc<dyn DatagramTransport>,
        name: &str,
        options: &Options,
        crypto: Box<dyn CryptoProvider>,
        frozen: Vec<u8>,
    ) -> anyhow::Result<Mocket> {
        let (name_, options_) = (name.to_string(), options.clone());
        Self::start(transport, name, options, move || {
            let mut data: &[u8] = &frozen;
            Connection::defrost(&name_, &options_, crypto, &mut data)
                .map_err(|_| ErrorKind::InvalidFrozenState)
        })
    }

    fn start(
        transport: Arc<dyn DatagramTransport>,
        name: &str,
        options: &Options,
        create: impl FnOnce() -> Result<Connection, ErrorKind> + Send + 'static,
    ) -> anyhow::Result<Mocket> {
        let shared = Arc::new(Shared {
            snapshot: Mutex::new(Snapshot {
                state: ConnectionState::Closed,
                remote_addr: None,
                metrics: None,
                messages: VecDeque::new(),
                failure: None,
                running: true,
            }),
            changed: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let (input, inputs) = mpsc::channel();
        let (created_tx, created) = mpsc::channel();

        let worker = Worker {
            name: name.to_string(),
            transport: Arc::clone(&transport),
            shared: Arc::clone(&shared),
            start: Instant::now(),
            max_wait: options.receive_timeout,
        };
        let worker = thread::Builder::new()
            .name(format!("{name}-tx"))
            .spawn(move || match create() {
                Ok(connection) => {
                    let _ = created_tx.send(Ok(()));
                    worker.run(connection, inputs);
                }
                Err(e) => {
                    let _ = created_tx.send(Err(e));
                }
            })
            .context("Failed to spawn transmitter thread")?;
        created.recv().context("Transmitter thread exited")??;

        let receiver = {
            let (transport, shared, input) =
                (Arc::clone(&transport), Arc::clone(&shared), input.clone());
            let timeout = options.receive_timeout;
            thread::Builder::new()
                .name(format!("{name}-rx"))
                .spawn(move || receive_loop(transport, shared, input, timeout))
                .context("Failed to spawn receiver thread")?
        };

        let mocket = Mocket {
            name: name.to_string(),
            options: options.clone(),
            transport,
            shared,
            input,
            worker: Some(worker),
            receiver: Some(receiver),
        };
        // Returns once the initial state has been published.
        mocket.execute(|_| ())?;
        Ok(mocket)
    }

    /// Runs `f` on the connection in the worker thread, and returns its result once the
    /// resulting events have been processed.
    fn execute<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Connection) -> R + Send + 'static,
    ) -> Result<R, ErrorKind> {
        let (reply_tx, reply) = mpsc::channel();
        let command: Command = Box::new(move |connection| {
            let result = f(connection);
            Box::new(move || {
                let _ = reply_tx.send(result);
            })
        });
        self.input.send(Input::Command(command)).map_err(|_| ErrorKind::TransportFailed)?;
        reply.recv().map_err(|_| ErrorKind::TransportFailed)
    }

    fn local_addr(&self) -> Result<SocketAddr, ErrorKind> {
        self.transport.local_addr().map_err(|_| ErrorKind::TransportFailed)
    }

    fn clear_failure(&self) {
        self.shared.lock().failure = None;
    }

    fn failure(&self, fallback: ErrorKind) -> ErrorKind {
        self.shared.lock().failure.unwrap_or(fallback)
    }

    /// Opens a connection to `remote`, and waits until it's established.
    pub fn connect(&self, remote: SocketAddr) -> Result<(), ErrorKind> {
        let local = self.local_addr()?;
        self.clear_failure();
        let state = self.execute(move |c| {
            if c.state() == ConnectionState::Closed {
                c.connect(local, remote);
            }
            c.state()
        })?;
        if state != ConnectionState::Connecting {
            return Err(ErrorKind::WrongState);
        }
        let timeout = self.options.connect_timeout + self.options.receive_timeout;
        match self.shared.wait_until(timeout, |s| s.state != ConnectionState::Connecting) {
            Ok(s) if s.state == ConnectionState::Connected => Ok(()),
            Ok(s) => Err(s.failure.unwrap_or(ErrorKind::NotConnected)),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Accepts one incoming connection, and returns the address of the peer.
    pub fn accept(&self, timeout: Duration) -> Result<SocketAddr, ErrorKind> {
        let local = self.local_addr()?;
        self.clear_failure();
        let state = self.execute(move |c| {
            if c.state() == ConnectionState::Closed {
                c.listen(local);
            }
            c.state()
        })?;
        if state != ConnectionState::Listening {
            return Err(ErrorKind::WrongState);
        }
        let s = self.shared.wait_until(timeout, |s| s.state != ConnectionState::Listening)?;
        match (s.state, s.remote_addr) {
            (ConnectionState::Connected, Some(remote)) => Ok(remote),
            _ => Err(s.failure.unwrap_or(ErrorKind::NotConnected)),
        }
    }

    /// Sends `message`. Reliable messages are delivered even when the call has returned.
    pub fn send(&self, message: Message) -> Result<(), ErrorKind> {
        match self.execute(move |c| c.send(message))? {
            SendStatus::Success => Ok(()),
            SendStatus::ErrorMessageTooLarge => Err(ErrorKind::InvalidArgument),
            SendStatus::ErrorNotConnected => Err(ErrorKind::NotConnected),
            SendStatus::ErrorResourceExhaustion => Err(ErrorKind::ResourceExhaustion),
            SendStatus::ErrorShuttingDown => Err(ErrorKind::WrongState),
        }
    }

    /// Waits up to `timeout` for a message. Fails with [`ErrorKind::NotConnected`] once the
    /// connection is closed and all received messages have been returned.
    pub fn receive(&self, timeout: Duration) -> Result<Message, ErrorKind> {
        let mut s = self.shared.wait_until(timeout, |s| {
            !s.messages.is_empty() || s.state == ConnectionState::Closed
        })?;
        s.messages.pop_front().ok_or(ErrorKind::NotConnected)
    }

    /// Cancels the messages with `tag` on `flow` that are not yet acknowledged.
    pub fn cancel(&self, flow: Flow, tag: u16) -> Result<usize, ErrorKind> {
        self.execute(move |c| c.cancel(flow, tag))
    }

    /// Suspends the connection, and waits until the peer has acknowledged it.
    pub fn suspend(&self, timeout: Duration) -> Result<(), ErrorKind> {
        self.clear_failure();
        let state = self.execute(move |c| {
            if c.state() == ConnectionState::Connected {
                c.suspend(timeout);
            }
            c.state()
        })?;
        match state {
            ConnectionState::Suspending => {}
            ConnectionState::Suspended => return Ok(()),
            _ => return Err(ErrorKind::WrongState),
        }
        let timeout = timeout.max(self.options.min_suspend_resume_timeout)
            + self.options.receive_timeout;
        let s = self.shared.wait_until(timeout, |s| s.state != ConnectionState::Suspending)?;
        match s.state {
            ConnectionState::Suspended => Ok(()),
            _ => Err(s.failure.unwrap_or(ErrorKind::WrongState)),
        }
    }

    /// Returns the state of the suspended connection, to be restored by [`Mocket::defrost`].
    pub fn freeze(&self) -> Result<Vec<u8>, ErrorKind> {
        self.execute(|c| {
            let mut frozen = Vec::new();
            c.freeze(&mut frozen).map(|_| frozen)
        })?
    }

    /// Resumes a suspended connection from the current address of the transport.
    pub fn resume(&self, timeout: Duration) -> Result<(), ErrorKind> {
        self.resume_or_reestablish(timeout, false)
    }

    /// Re-attaches an established connection to the peer from the current address of the
    /// transport.
    pub fn reestablish(&self, timeout: Duration) -> Result<(), ErrorKind> {
        self.resume_or_reestablish(timeout, true)
    }

    fn resume_or_reestablish(&self, timeout: Duration, reestablish: bool) -> Result<(), ErrorKind> {
        let local = self.local_addr()?;
        self.clear_failure();
        let state = self.execute(move |c| {
            if reestablish {
                c.reestablish(local, timeout);
            } else {
                c.resume(local, timeout);
            }
            c.state()
        })?;
        if state != ConnectionState::Resuming {
            return Err(self.failure(ErrorKind::WrongState));
        }
        let timeout = timeout.max(self.options.min_suspend_resume_timeout)
            + self.options.receive_timeout;
        let s = self.shared.wait_until(timeout, |s| s.state != ConnectionState::Resuming)?;
        match s.state {
            ConnectionState::Connected => Ok(()),
            _ => Err(s.failure.unwrap_or(ErrorKind::NotConnected)),
        }
    }

    /// Gracefully closes the connection, after outstanding reliable data has been
    /// acknowledged.
    pub fn close(&self) -> Result<(), ErrorKind> {
        self.clear_failure();
        let state = self.execute(|c| {
            c.shutdown();
            c.state()
        })?;
        if !matches!(state, ConnectionState::ShuttingDown | ConnectionState::Closed) {
            return Err(ErrorKind::WrongState);
        }
        let options = &self.options;
        let timeout = options.flush_timeout
            + options.shutdown_timeout * options.max_shutdown_attempts
            + options.receive_timeout;
        match self.shared.wait_until(timeout, |s| s.state == ConnectionState::Closed) {
            Ok(s) => s.failure.map_or(Ok(()), Err),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Closes the connection at once, telling the peer with ABORT.
    pub fn abort(&self) {
        if self.execute(|c| c.close()).is_err() {
            warn!("{}: Worker is gone, can't abort", self.name);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().remote_addr
    }

    pub fn metrics(&self) -> Option<Metrics> {
        self.shared.lock().metrics.clone()
    }

    /// The address of the transport, which the connection is sent from.
    pub fn transport_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr().context("Transport has no local address")
    }
}

impl Drop for Mocket {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        let _ = self.input.send(Input::Stop);
        if self.shared.wait_until(self.options.receive_timeout * 4, |s| !s.running).is_err() {
            debug!("{}: Worker did not stop in time", self.name);
        }
        for handle in [self.worker.take(), self.receiver.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("{}: A worker thread panicked", self.name);
            }
        }
    }
}

fn receive_loop(
    transport: Arc<dyn DatagramTransport>,
    shared: Arc<Shared>,
    input: mpsc::Sender<Input>,
    timeout: Duration,
) {
    let mut buf = vec![0; MAX_DATAGRAM_SIZE];
    while !shared.stop.load(Ordering::Relaxed) {
        match transport.recv_from(&mut buf, timeout) {
            Ok(Some((len, from))) => {
                if input.send(Input::Datagram(from, buf[..len].to_vec())).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                let _ = input.send(Input::TransportFailed(e.to_string()));
                return;
            }
        }
    }
}

/// Owns the connection, and transmits the packets it generates.
struct Worker {
    name: String,
    transport: Arc<dyn DatagramTransport>,
    shared: Arc<Shared>,
    start: Instant,

    /// How long to wait for input when no timer is due sooner.
    max_wait: Duration,
}

impl Worker {
    fn now(&self) -> MocketTime {
        MocketTime::from(self.start.elapsed())
    }

    fn run(&self, mut connection: Connection, inputs: mpsc::Receiver<Input>) {
        self.publish(&mut connection);
        loop {
            let wait = (connection.poll_timeout() - self.now()).min(self.max_wait);
            let input = inputs.recv_timeout(wait);
            connection.advance_time(self.now());
            match input {
                Ok(Input::Datagram(from, data)) => connection.handle_input(from, &data),
                Ok(Input::Command(command)) => {
                    let reply = command(&mut connection);
                    self.publish(&mut connection);
                    reply();
                    continue;
                }
                Ok(Input::TransportFailed(e)) => {
                    warn!("{}: Transport failed: {}", self.name, e);
                    connection.close();
                    self.publish(&mut connection);
                    self.shared.lock().failure = Some(ErrorKind::TransportFailed);
                    break;
                }
                Ok(Input::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.publish(&mut connection);
        }
        // A suspended connection may have been frozen, to be resumed elsewhere.
        if connection.state() != ConnectionState::Suspended {
            connection.close();
        }
        self.publish(&mut connection);
        self.shared.lock().running = false;
        self.shared.changed.notify_all();
    }

    /// Sends the generated packets, and publishes state changes and received messages.
    fn publish(&self, connection: &mut Connection) {
        let mut failure = None;
        while let Some(event) = connection.poll_event() {
            match event {
                MocketEvent::SendPacket(to, packet) => {
                    if let Err(e) = self.transport.send_to(&packet, to) {
                        warn!("{}: Failed to send packet to {}: {}", self.name, to, e);
                    }
                }
                MocketEvent::OnConnectionFailed(kind, _) | MocketEvent::OnAborted(kind, _) => {
                    failure = Some(kind);
                }
                MocketEvent::OnError(kind, e) => info!("{}: {:?}: {}", self.name, kind, e),
                _ => {}
            }
        }
        let mut s = self.shared.lock();
        while let Some(message) = connection.get_next_message() {
            s.messages.push_back(message);
        }
        if failure.is_some() {
            s.failure = failure;
        }
        s.state = connection.state();
        s.remote_addr = connection.remote_addr();
        s.metrics = connection.get_metrics().or(s.metrics.take());
        drop(s);
        self.shared.changed.notify_all();
    }
}
