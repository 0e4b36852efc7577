//! Device session management.
//!
//! A [`Session`] owns the transport, the receiver and the correlator for one
//! device connection. All I/O happens on the caller's thread: waiting for a
//! response pumps the transport in a loop, sleeping briefly after each empty
//! read, until the matching frame arrives or the deadline passes.
//!
//! ```text
//! DISCONNECTED --connect--> CONNECTING --open ok--> CONNECTED
//!      ^                         |                      |
//!      +-------open failed-------+                      |
//!      +--disconnect / transport error / disconnect-----+
//! ```
//!
//! Transport errors end the session: pending operations fail with
//! [`Error::Disconnected`], the disconnect handler fires, and nothing is
//! retried until [`Session::reconnect`] is called.

use crate::error::{Error, Result};
use crate::port::{PortOpener, Transport};
use crate::protocol::correlator::{Correlator, Ticket};
use crate::protocol::message::{FileEntry, Request, Response, VersionInfo};
use crate::protocol::receiver::Receiver;
use crate::protocol::transfer::{self, DEFAULT_CHUNK_SIZE};
use log::{debug, info, trace, warn};
use std::time::Duration;

/// Session tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Baud rate used when no override is given.
    pub baud_rate: u32,
    /// How long to wait for each response.
    pub request_timeout: Duration,
    /// Delay after a read that returned no bytes.
    pub poll_interval: Duration,
    /// Bytes per write-data operation.
    pub chunk_size: usize,
    /// Size of the transport read buffer.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(5),
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_buffer_size: 4096,
        }
    }
}

impl SessionConfig {
    /// Set the default baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the delay between empty reads.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the write chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// The transport is open and being pumped.
    Connected,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`Session::disconnect`] was called.
    Requested,
    /// Reading or writing the transport failed.
    TransportError(String),
}

/// Callback invoked when a connected session ends.
pub type DisconnectHandler = Box<dyn FnMut(&DisconnectReason) + Send>;

/// One connection to a device.
pub struct Session<O: PortOpener> {
    opener: O,
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
    receiver: Receiver,
    correlator: Correlator,
    state: SessionState,
    last_port: Option<String>,
    last_baud: Option<u32>,
    on_disconnect: Option<DisconnectHandler>,
    read_buf: Vec<u8>,
}

impl<O: PortOpener> Session<O> {
    /// Create a disconnected session with default settings.
    pub fn new(opener: O) -> Self {
        Self::with_config(opener, SessionConfig::default())
    }

    /// Create a disconnected session.
    pub fn with_config(opener: O, config: SessionConfig) -> Self {
        let read_buf = vec![0u8; config.read_buffer_size.max(1)];
        Self {
            opener,
            config,
            transport: None,
            receiver: Receiver::new(),
            correlator: Correlator::new(),
            state: SessionState::Disconnected,
            last_port: None,
            last_baud: None,
            on_disconnect: None,
            read_buf,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is connected.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Port used by the most recent successful connection.
    pub fn last_port(&self) -> Option<&str> {
        self.last_port.as_deref()
    }

    /// Baud rate used by the most recent successful connection.
    pub fn last_baud(&self) -> Option<u32> {
        self.last_baud
    }

    /// The port opener.
    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Mutable access to the port opener.
    pub fn opener_mut(&mut self) -> &mut O {
        &mut self.opener
    }

    /// Register the disconnect handler.
    ///
    /// Only one handler is kept; registering a new one replaces the old one.
    pub fn set_disconnect_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&DisconnectReason) + Send + 'static,
    {
        self.on_disconnect = Some(Box::new(handler));
    }

    /// Remove the disconnect handler.
    pub fn clear_disconnect_handler(&mut self) {
        self.on_disconnect = None;
    }

    /// Select a port through the opener and connect to it.
    ///
    /// Does nothing if already connected.
    pub fn connect(&mut self, baud_override: Option<u32>) -> Result<()> {
        if self.is_connected() {
            debug!("Already connected");
            return Ok(());
        }
        let baud = baud_override
            .or(self.last_baud)
            .unwrap_or(self.config.baud_rate);

        self.state = SessionState::Connecting;
        let port = match self.opener.select_port() {
            Ok(port) => port,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            },
        };
        self.open_port(&port, baud)
    }

    /// Connect to a specific port.
    pub fn connect_to(&mut self, port: &str, baud_override: Option<u32>) -> Result<()> {
        if self.is_connected() {
            self.disconnect();
        }
        let baud = baud_override
            .or(self.last_baud)
            .unwrap_or(self.config.baud_rate);
        self.state = SessionState::Connecting;
        self.open_port(port, baud)
    }

    /// Disconnect if connected, then reopen the previous port at the previous
    /// baud rate, falling back to a fresh port selection.
    pub fn reconnect(&mut self) -> Result<()> {
        self.disconnect();

        let baud = self
            .last_baud
            .unwrap_or(self.config.baud_rate);
        if let Some(port) = self.last_port.clone() {
            info!("Reconnecting to {port} at {baud} baud");
            self.state = SessionState::Connecting;
            match self.open_port(&port, baud) {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Could not reopen {port}: {e}"),
            }
        }

        self.connect(Some(baud))
    }

    /// Tear down the session. Calling this while disconnected does nothing.
    pub fn disconnect(&mut self) {
        self.teardown(DisconnectReason::Requested);
    }

    fn open_port(&mut self, port: &str, baud: u32) -> Result<()> {
        debug!("Opening {port} at {baud} baud");
        match self.opener.open(port, baud) {
            Ok(mut transport) => {
                if let Err(e) = transport.clear_buffers() {
                    debug!("Could not clear buffers: {e}");
                }
                self.transport = Some(transport);
                self.receiver = Receiver::new();
                self.correlator = Correlator::new();
                self.last_port = Some(port.to_string());
                self.last_baud = Some(baud);
                self.state = SessionState::Connected;
                info!("Connected to {port} at {baud} baud");
                Ok(())
            },
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            },
        }
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        let was_connected = self.transport.is_some();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("Error closing {}: {e}", transport.name());
            }
        }
        self.correlator
            .fail_all(|_| Error::Disconnected);
        self.receiver.reset();
        self.state = SessionState::Disconnected;

        if was_connected {
            match &reason {
                DisconnectReason::Requested => info!("Disconnected"),
                DisconnectReason::TransportError(e) => warn!("Connection lost: {e}"),
            }
            if let Some(handler) = self.on_disconnect.as_mut() {
                handler(&reason);
            }
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        self.teardown(DisconnectReason::TransportError(error.to_string()));
        error
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Run one read cycle: read available bytes, feed the receiver, and
    /// expire overdue requests. Returns the number of bytes read.
    ///
    /// A read failure ends the session.
    pub fn pump(&mut self) -> Result<usize> {
        self.ensure_connected()?;
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };

        let n = match transport.read_available(&mut self.read_buf) {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e)),
        };
        if n > 0 {
            trace!("Pumped {n} bytes");
            self.receiver
                .feed(&self.read_buf[..n], &mut self.correlator);
        }
        self.correlator.expire();
        Ok(n)
    }

    /// Send a request and register for its response.
    ///
    /// The returned ticket is collected with [`Session::wait`] or
    /// [`Session::poll`]. Submitting a second request with the same response
    /// code supersedes the first.
    pub fn submit(&mut self, request: &Request) -> Result<Ticket> {
        let op = request.operation();
        if !op.expects_response() {
            return Err(Error::Protocol(format!("{op} has no response to wait for")));
        }
        self.ensure_connected()?;
        let data = request.to_frame()?;

        let ticket = self
            .correlator
            .wait_for(op.response_code(), self.config.request_timeout);
        debug!("Sending {op} ({} bytes)", data.len());
        if let Err(e) = self.write(&data) {
            self.correlator.take(ticket);
            return Err(e);
        }
        Ok(ticket)
    }

    /// Send a request that expects no response.
    pub fn notify(&mut self, request: &Request) -> Result<()> {
        self.ensure_connected()?;
        let op = request.operation();
        debug!("Sending {op} (no response expected)");
        self.write(&request.to_frame()?)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };
        match transport.write_all_bytes(data) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Pump once and collect the ticket's outcome if it has settled.
    pub fn poll(&mut self, ticket: Ticket) -> Result<Option<Vec<u8>>> {
        if let Some(outcome) = self.correlator.take(ticket) {
            return outcome.map(Some);
        }
        if let Err(e) = self.pump() {
            self.correlator.take(ticket);
            return Err(e);
        }
        self.correlator
            .take(ticket)
            .transpose()
    }

    /// Pump until the ticket settles and return its payload.
    pub fn wait(&mut self, ticket: Ticket) -> Result<Vec<u8>> {
        loop {
            if let Some(outcome) = self.correlator.take(ticket) {
                return outcome;
            }
            if !self.correlator.is_known(ticket) {
                return Err(Error::Protocol("unknown or already collected ticket".into()));
            }
            if crate::is_interrupted_requested() {
                self.correlator
                    .cancel(ticket, Error::Interrupted);
                continue;
            }
            match self.pump() {
                Ok(0) => std::thread::sleep(self.config.poll_interval),
                Ok(_) => {},
                Err(e) => {
                    self.correlator.take(ticket);
                    return Err(e);
                },
            }
        }
    }

    /// Send a request, wait for its response and decode it.
    pub fn request(&mut self, request: &Request) -> Result<Response> {
        let op = request.operation();
        if !op.expects_response() {
            self.notify(request)?;
            return op.decode(None);
        }
        let ticket = self.submit(request)?;
        let payload = self.wait(ticket)?;
        op.decode(Some(&payload))
    }

    /// Query the firmware version.
    pub fn get_version(&mut self) -> Result<VersionInfo> {
        self.request(&Request::GetVersion)?
            .into_version()
    }

    /// List a directory, directories first then by name.
    pub fn list_folder(&mut self, path: &str) -> Result<Vec<FileEntry>> {
        let mut entries: Vec<FileEntry> = self
            .request(&Request::ListFolder {
                path: path.to_string(),
            })?
            .into_listing()?
            .into_iter()
            .map(FileEntry::normalized)
            .collect();
        entries.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(entries)
    }

    /// Query a single file's descriptor.
    pub fn get_file_info(&mut self, path: &str) -> Result<FileEntry> {
        Ok(self
            .request(&Request::GetFileInfo {
                path: path.to_string(),
            })?
            .into_file_info()?
            .normalized())
    }

    /// Read a whole file.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.request(&Request::ReadFile {
            path: path.to_string(),
        })?
        .into_file_data()
    }

    /// Delete a file.
    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        self.request(&Request::DeleteFile {
            path: path.to_string(),
        })?
        .into_ack()
    }

    /// Create a directory.
    pub fn make_directory(&mut self, path: &str) -> Result<()> {
        self.request(&Request::MakeDirectory {
            path: path.to_string(),
        })?
        .into_ack()
    }

    /// Rename or move a file.
    pub fn rename_file(&mut self, from: &str, to: &str) -> Result<()> {
        self.request(&Request::RenameFile {
            from: from.to_string(),
            to: to.to_string(),
        })?
        .into_ack()
    }

    /// Ask the device to restart. No response is awaited.
    pub fn reboot(&mut self) -> Result<()> {
        info!("Rebooting device");
        self.notify(&Request::Reboot)
    }

    /// Write a file in chunks.
    ///
    /// `progress` receives a percentage after each acknowledged chunk, capped
    /// at 99 until the end operation succeeds, then 100. Any failure aborts
    /// the transfer; the device may be left with a partial file and the
    /// caller must restart from the beginning.
    pub fn write_file<F>(&mut self, path: &str, data: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(u8),
    {
        self.ensure_connected()?;
        let total = data.len();
        let size = total as u64;
        info!("Writing {path} ({total} bytes)");

        self.request(&Request::WriteFileStart {
            path: path.to_string(),
            size,
        })?
        .into_ack()?;

        for chunk in transfer::chunks(data, self.config.chunk_size) {
            self.request(&Request::WriteFileData {
                path: path.to_string(),
                data: chunk.bytes.to_vec(),
                last: chunk.last,
            })?
            .into_ack()?;
            debug!("Chunk at {} acknowledged ({} bytes)", chunk.offset, chunk.bytes.len());
            progress(transfer::progress_percent(chunk.end(), total));
        }

        self.request(&Request::WriteFileEnd {
            path: path.to_string(),
            size,
        })?
        .into_ack()?;
        progress(100);

        info!("Wrote {path}");
        Ok(())
    }
}

impl<O: PortOpener> Drop for Session<O> {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close();
        }
    }
}
