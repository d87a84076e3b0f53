use std::{
    io::{self, Read},
    iter,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

use log::{debug, info, trace};

use crate::{
    config::TransportConfig,
    error::{ProtocolError, Result, SyncError, TransportError},
    item::{Options, PathFilter, SyncItem},
    pool::{Capacity, Pool, Pooled, PooledBuffer, buffer_pool},
    protocol::{ExchangeState, Part, Request, ResponseHeader},
    registry::Registry,
};

use super::{
    ItemStream, Receiver, Sender,
    connection::{Connection, TcpTransport},
};

/// Occupancy of a client's pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
    pub active_connections: usize,
    pub idle_buffers: usize,
    pub active_buffers: usize,
}

/// Blocking TCP client shared by [`TcpSender`] and [`TcpReceiver`].
///
/// Requests run on pooled connections, one request per connection at a time;
/// concurrent callers use distinct connections up to
/// [`TransportConfig::max_connections`].
#[derive(Debug)]
pub struct TcpClient {
    config: TransportConfig,
    options: Options,
    registry: Arc<Registry>,
    session: Option<Session>,
}

#[derive(Debug)]
struct Session {
    address: SocketAddr,
    connections: Pool<Connection, SyncError>,
    buffers: Pool<PooledBuffer>,
}

impl TcpClient {
    pub fn new(config: TransportConfig, options: Options) -> Self {
        Self {
            config,
            options,
            registry: Arc::new(Registry::standard()),
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(|session| session.address)
    }

    pub fn stats(&self) -> PoolStats {
        self.session
            .as_ref()
            .map(|session| PoolStats {
                idle_connections: session.connections.idle(),
                active_connections: session.connections.outstanding(),
                idle_buffers: session.buffers.idle(),
                active_buffers: session.buffers.outstanding(),
            })
            .unwrap_or_default()
    }

    /// Resolves `address` and opens the first connection. Further connections
    /// are opened on demand.
    pub fn connect(&mut self, address: &str) -> Result<()> {
        self.disconnect()?;

        let resolved = address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addresses| addresses.next())
            .ok_or_else(|| TransportError::Unresolved(address.to_string()))?;

        let config = self.config.clone();
        let options = self.options;
        let registry = Arc::clone(&self.registry);
        let connections = Pool::new(
            Capacity::Bounded {
                max: self.config.max_connections.max(1),
                wait: self.config.pool_wait,
            },
            move || Connection::open(resolved, &config, options, Arc::clone(&registry)),
            |_| {},
        );
        let session = Session {
            address: resolved,
            connections,
            buffers: buffer_pool(self.config.buffer_size),
        };

        drop(session.connections.acquire()?);
        info!("connected to {resolved}");
        self.session = Some(session);
        Ok(())
    }

    /// Says goodbye on every idle connection and empties both pools.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        for connection in session.connections.drain() {
            if let Err(e) = connection.close() {
                debug!("closing connection to {} failed: {e}", session.address);
            }
        }
        session.buffers.drain();
        info!("disconnected from {}", session.address);
        Ok(())
    }

    pub fn ping(&self) -> Result<()> {
        self.call(&Request::Ping)
    }

    /// Checks out a connection and a buffer for one exchange.
    fn exchange(&self) -> Result<Exchange<'_>> {
        let session = self
            .session
            .as_ref()
            .ok_or(TransportError::NotConnected)?;

        Ok(Exchange {
            connection: Some(session.connections.acquire()?),
            buffer: session.buffers.acquire()?,
            registry: &self.registry,
            state: ExchangeState::Idle,
        })
    }

    fn start(&self, request: &Request) -> Result<Exchange<'_>> {
        let mut exchange = self.exchange()?;
        trace!("starting {} exchange", request.command());
        exchange.send(request)?;
        Ok(exchange)
    }

    /// Runs a request answered by an empty OK.
    fn call(&self, request: &Request) -> Result<()> {
        self.start(request)?.ack()
    }

    fn sync_items(&self, request: Request) -> ItemStream<'_> {
        match self.start(&request).and_then(Exchange::open_stream) {
            Ok(exchange) => Box::new(RemoteItems {
                exchange,
                done: false,
            }),
            Err(e) => Box::new(iter::once(Err(e))),
        }
    }

    fn checksum(&self, request: Request, progress: &mut dyn FnMut(u64)) -> Result<String> {
        let mut exchange = self.start(&request)?.open_stream()?;
        let mut digest = None;

        while let Some(part) = exchange.next_part()? {
            match part {
                Part::Progress(bytes) => progress(bytes),
                Part::Data => digest = Some(exchange.decode::<String>()?),
                Part::Error(remote) => return Err(remote.into()),
            }
        }
        digest.ok_or_else(|| ProtocolError::Unexpected("checksum stream without a digest").into())
    }

    fn read_file(&self, request: Request) -> Result<Box<dyn Read + '_>> {
        let exchange = self.start(&request)?.open_stream()?;
        Ok(Box::new(RemoteFile {
            exchange,
            done: false,
        }))
    }

    fn write_file(&self, request: Request, size: u64, data: &mut dyn Read) -> Result<()> {
        let mut exchange = self.exchange()?;
        exchange.send_with_data(&request, size, data, self.config.buffer_size)?;
        exchange.ack()
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            debug!("disconnect on drop failed: {e}");
        }
    }
}

/// One request/response on a pooled connection.
///
/// Dropping the exchange returns the buffer, and returns the connection only
/// if the exchange ended cleanly; otherwise the connection is closed.
struct Exchange<'a> {
    connection: Option<Pooled<'a, Connection, SyncError>>,
    buffer: Pooled<'a, PooledBuffer>,
    registry: &'a Registry,
    state: ExchangeState,
}

impl Exchange<'_> {
    fn split(&mut self) -> (&mut TcpTransport, &mut PooledBuffer) {
        let connection = self
            .connection
            .as_mut()
            .expect("connection is held until the exchange drops");
        (connection.transport(), &mut *self.buffer)
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        self.split().0.write_request(request)?;
        self.state = self.state.sent()?.flushed()?;
        Ok(())
    }

    /// Sends `request` followed by up to `size` bytes of `data` as data frames.
    fn send_with_data(
        &mut self,
        request: &Request,
        size: u64,
        data: &mut dyn Read,
        chunk_size: usize,
    ) -> Result<()> {
        let (transport, buffer) = self.split();
        transport.begin_request(request)?;

        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(chunk_size as u64) as usize;
            buffer.reset();
            buffer.ensure_capacity(want);
            let n = match data.read(&mut buffer.spare_mut()[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            buffer.commit(n);
            transport.write_data(buffer.readable())?;
            remaining -= n as u64;
        }
        transport.finish()?;

        self.state = self.state.sent()?.flushed()?;
        Ok(())
    }

    fn header(&mut self) -> Result<ResponseHeader> {
        let header = self.split().0.read_header()?;
        self.state = self.state.header(&header)?;
        Ok(header)
    }

    /// Consumes an ERROR body and turns it into the error to return.
    fn raise(&mut self, header: &ResponseHeader) -> SyncError {
        match self.split().0.read_remote_error(header) {
            Ok(remote) => match self.state.body_read() {
                Ok(state) => {
                    self.state = state;
                    remote.into()
                }
                Err(e) => e.into(),
            },
            Err(e) => e,
        }
    }

    fn ack(mut self) -> Result<()> {
        let header = self.header()?;
        match self.state {
            ExchangeState::AwaitingErrorBody => Err(self.raise(&header)),
            ExchangeState::AwaitingBody => {
                let (transport, buffer) = self.split();
                transport.read_body(&header, buffer)?;
                self.state = self.state.body_read()?;
                Ok(())
            }
            _ => Err(ProtocolError::Unexpected("streamed body in an acknowledgement").into()),
        }
    }

    fn open_stream(mut self) -> Result<Self> {
        let header = self.header()?;
        match self.state {
            ExchangeState::Streaming => Ok(self),
            ExchangeState::AwaitingErrorBody => Err(self.raise(&header)),
            _ => Err(ProtocolError::Unexpected("fixed body where a stream was expected").into()),
        }
    }

    /// Reads the next part. A data part's payload stays in the buffer.
    fn next_part(&mut self) -> Result<Option<Part>> {
        let (transport, buffer) = self.split();
        match transport.read_part(buffer)? {
            None => {
                self.state = self.state.body_read()?;
                Ok(None)
            }
            Some(Part::Error(remote)) => {
                transport.expect_finish()?;
                self.state = self.state.stream_failed()?;
                Ok(Some(Part::Error(remote)))
            }
            Some(part) => Ok(Some(part)),
        }
    }

    /// Decodes the value filling the current part.
    fn decode<T: 'static>(&mut self) -> Result<T> {
        let value = self.registry.decode(&mut *self.buffer)?;
        if !self.buffer.is_empty() {
            return Err(ProtocolError::Unexpected("trailing bytes after a value part").into());
        }
        Ok(value)
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if !self.state.is_clean() {
                debug!("closing connection abandoned while {:?}", self.state);
                connection.discard();
            }
        }
    }
}

/// Items of a streamed enumeration, decoded as they arrive.
struct RemoteItems<'a> {
    exchange: Exchange<'a>,
    done: bool,
}

impl Iterator for RemoteItems<'_> {
    type Item = Result<SyncItem>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let next = match self.exchange.next_part() {
                Ok(Some(Part::Data)) => self.exchange.decode::<SyncItem>(),
                Ok(Some(Part::Progress(_))) => continue,
                Ok(Some(Part::Error(remote))) => Err(remote.into()),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => Err(e),
            };
            self.done = next.is_err();
            return Some(next);
        }
        None
    }
}

/// File contents of a streamed `SOURCE_READ_FILE` response.
struct RemoteFile<'a> {
    exchange: Exchange<'a>,
    done: bool,
}

impl Read for RemoteFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (_, pending) = self.exchange.split();
            if !pending.is_empty() {
                return Ok(pending.take(buf));
            }
            if self.done {
                return Ok(0);
            }

            match self.exchange.next_part().map_err(io::Error::from)? {
                Some(Part::Data) | Some(Part::Progress(_)) => continue,
                Some(Part::Error(remote)) => {
                    self.done = true;
                    return Err(remote.into());
                }
                None => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
    }
}

/// [`Sender`] reached over TCP.
#[derive(Debug)]
pub struct TcpSender {
    client: TcpClient,
}

impl TcpSender {
    pub fn new(config: TransportConfig, options: Options) -> Self {
        Self {
            client: TcpClient::new(config, options),
        }
    }

    pub fn client(&self) -> &TcpClient {
        &self.client
    }
}

impl Sender for TcpSender {
    fn connect(&mut self, address: &str) -> Result<()> {
        self.client.connect(address)
    }

    fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect()
    }

    fn generate_sync_items(
        &self,
        root: &str,
        follow_sym_links: bool,
        filter: &PathFilter,
    ) -> ItemStream<'_> {
        self.client.sync_items(Request::SourceCreateSyncItems {
            root: root.to_string(),
            follow_sym_links,
            filter: filter.clone(),
        })
    }

    fn generate_checksum(
        &self,
        root: &str,
        relative_path: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<String> {
        let request = Request::SourceChecksum {
            root: root.to_string(),
            path: relative_path.to_string(),
        };
        self.client.checksum(request, progress)
    }

    fn read_file(
        &self,
        base_dir: &str,
        relative_file: &str,
        size: u64,
    ) -> Result<Box<dyn Read + '_>> {
        self.client.read_file(Request::SourceReadFile {
            base_dir: base_dir.to_string(),
            file: relative_file.to_string(),
            size,
        })
    }
}

/// [`Receiver`] reached over TCP.
#[derive(Debug)]
pub struct TcpReceiver {
    client: TcpClient,
}

impl TcpReceiver {
    pub fn new(config: TransportConfig, options: Options) -> Self {
        Self {
            client: TcpClient::new(config, options),
        }
    }

    pub fn client(&self) -> &TcpClient {
        &self.client
    }
}

impl Receiver for TcpReceiver {
    fn connect(&mut self, address: &str) -> Result<()> {
        self.client.connect(address)
    }

    fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect()
    }

    fn generate_sync_items(
        &self,
        root: &str,
        follow_sym_links: bool,
        filter: &PathFilter,
    ) -> ItemStream<'_> {
        self.client.sync_items(Request::TargetCreateSyncItems {
            root: root.to_string(),
            follow_sym_links,
            filter: filter.clone(),
        })
    }

    fn generate_checksum(
        &self,
        root: &str,
        relative_path: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<String> {
        let request = Request::TargetChecksum {
            root: root.to_string(),
            path: relative_path.to_string(),
        };
        self.client.checksum(request, progress)
    }

    fn create_directory(&self, root: &str, item: &SyncItem) -> Result<()> {
        self.client.call(&Request::TargetCreateDirectory {
            root: root.to_string(),
            item: item.clone(),
        })
    }

    fn delete(&self, root: &str, item: &SyncItem) -> Result<()> {
        self.client.call(&Request::TargetDelete {
            root: root.to_string(),
            item: item.clone(),
        })
    }

    fn update(&self, root: &str, item: &SyncItem) -> Result<()> {
        self.client.call(&Request::TargetUpdate {
            root: root.to_string(),
            item: item.clone(),
        })
    }

    fn validate_file(&self, root: &str, item: &SyncItem) -> Result<()> {
        self.client.call(&Request::TargetValidateFile {
            root: root.to_string(),
            item: item.clone(),
        })
    }

    fn write_file(
        &self,
        base_dir: &str,
        relative_file: &str,
        size: u64,
        data: &mut dyn Read,
    ) -> Result<()> {
        let request = Request::TargetWriteFile {
            base_dir: base_dir.to_string(),
            file: relative_file.to_string(),
            size,
        };
        self.client.write_file(request, size, data)
    }
}
