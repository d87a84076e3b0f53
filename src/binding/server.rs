use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    config::ServerConfig,
    error::{ProtocolError, Result, SyncError},
    frame,
    pool::{Pool, PooledBuffer, buffer_pool},
    protocol::{PROTOCOL_VERSION, ProtocolTransport, Request},
    registry::Registry,
    remote::{RemoteError, RemoteErrorKind},
};

use super::{ItemStream, LocalPeer, Receiver, Sender, thread::WorkerPool};

/// How often the accept loop looks at the shutdown flag while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Blocking TCP server executing requests against a [`LocalPeer`].
///
/// Each accepted connection is served by one worker of a fixed pool until the
/// client disconnects, sends something unreadable, or goes quiet for longer
/// than the read timeout. A connection holds one buffer from the server's
/// pool for file chunks while it is served.
pub struct SyncServer {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<Registry>,
    buffers: Arc<Pool<PooledBuffer>>,
    shutdown: Arc<AtomicBool>,
}

impl SyncServer {
    pub fn bind(address: impl ToSocketAddrs, config: ServerConfig) -> Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(address)?,
            buffers: Arc::new(buffer_pool(config.buffer_size)),
            config,
            registry: Arc::new(Registry::standard()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops [`listen`](Self::listen) once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Serves connections until the shutdown flag is set, then waits for the
    /// connections in flight to finish.
    pub fn listen(self) -> Result<()> {
        info!("listening at {}", self.local_addr()?);
        self.listener.set_nonblocking(true)?;
        let pool = WorkerPool::new(self.config.workers)?;

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {peer}");
                    let registry = Arc::clone(&self.registry);
                    let buffers = Arc::clone(&self.buffers);
                    let config = self.config.clone();
                    pool.execute(move || {
                        if let Err(e) = handle_connection(stream, registry, &buffers, &config) {
                            warn!("connection from {peer} failed: {e}");
                        }
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }

        info!("shutting down");
        pool.shutdown();
        Ok(())
    }
}

fn handle_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    buffers: &Pool<PooledBuffer>,
    config: &ServerConfig,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(config.read_timeout)?;

    let reader = stream.try_clone()?;
    let mut transport = ProtocolTransport::new(reader, stream, registry, config.buffer_size)
        .with_max_frame(config.max_frame);
    let mut buffer = buffers.acquire()?;
    let mut peer = LocalPeer::default();

    loop {
        let request = match transport.read_request() {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("client closed the connection");
                return Ok(());
            }
            Err(e) => return reject(&mut transport, e),
        };
        debug!("received {}", request.command());

        match request {
            Request::Connect { version, options } => {
                if version != PROTOCOL_VERSION {
                    let error = RemoteError::new(
                        RemoteErrorKind::Protocol,
                        ProtocolError::Version(version).to_string(),
                    )
                    .with_frame(frame!("handle_connection"));
                    transport.write_error(&error)?;
                    return Ok(());
                }
                peer = LocalPeer::new(options);
                transport.write_ok(&[])?;
            }
            Request::Disconnect => {
                transport.write_ok(&[])?;
                return Ok(());
            }
            Request::Ping => transport.write_ok(&[])?,
            Request::SourceCreateSyncItems {
                root,
                follow_sym_links,
                filter,
            } => {
                let items = Sender::generate_sync_items(&peer, &root, follow_sym_links, &filter);
                stream_items(&mut transport, items)?;
            }
            Request::TargetCreateSyncItems {
                root,
                follow_sym_links,
                filter,
            } => {
                let items = Receiver::generate_sync_items(&peer, &root, follow_sym_links, &filter);
                stream_items(&mut transport, items)?;
            }
            Request::SourceChecksum { root, path } => {
                stream_checksum(&mut transport, |progress| {
                    Sender::generate_checksum(&peer, &root, &path, progress)
                })?;
            }
            Request::TargetChecksum { root, path } => {
                stream_checksum(&mut transport, |progress| {
                    Receiver::generate_checksum(&peer, &root, &path, progress)
                })?;
            }
            Request::SourceReadFile {
                base_dir,
                file,
                size,
            } => {
                let opened = peer.read_file(&base_dir, &file, size);
                stream_file(&mut transport, opened, &mut buffer, config.buffer_size)?;
            }
            Request::TargetCreateDirectory { root, item } => {
                respond(&mut transport, peer.create_directory(&root, &item))?;
            }
            Request::TargetDelete { root, item } => {
                respond(&mut transport, peer.delete(&root, &item))?;
            }
            Request::TargetUpdate { root, item } => {
                respond(&mut transport, peer.update(&root, &item))?;
            }
            Request::TargetValidateFile { root, item } => {
                respond(&mut transport, peer.validate_file(&root, &item))?;
            }
            Request::TargetWriteFile {
                base_dir,
                file,
                size,
            } => {
                let mut body = RequestBody::new(&mut transport, &mut buffer);
                let result = peer.write_file(&base_dir, &file, size, &mut body);
                if let Err(e) = body.drain() {
                    return reject(&mut transport, e);
                }
                respond(&mut transport, result)?;
            }
        }
    }
}

/// Answers a request that could not be read in full and ends the connection;
/// the byte stream is no longer aligned to frame boundaries.
fn reject<R: Read, W: Write>(
    transport: &mut ProtocolTransport<R, W>,
    err: SyncError,
) -> Result<()> {
    match err {
        SyncError::Protocol(e) => {
            warn!("rejecting malformed request: {e}");
            let error = RemoteError::new(RemoteErrorKind::Protocol, e.to_string())
                .with_frame(frame!("handle_connection"));
            transport.write_error(&error)
        }
        other => Err(other),
    }
}

fn respond<R: Read, W: Write>(
    transport: &mut ProtocolTransport<R, W>,
    result: Result<()>,
) -> Result<()> {
    match result {
        Ok(()) => transport.write_ok(&[]),
        Err(e) => transport.write_error(&to_remote(e)),
    }
}

fn stream_items<R: Read, W: Write>(
    transport: &mut ProtocolTransport<R, W>,
    items: ItemStream<'_>,
) -> Result<()> {
    transport.begin_stream()?;
    for item in items {
        match item {
            Ok(item) => transport.write_value_part(&item)?,
            Err(e) => {
                transport.write_error_part(&to_remote(e))?;
                break;
            }
        }
    }
    transport.end_stream()
}

fn stream_checksum<R, W, F>(transport: &mut ProtocolTransport<R, W>, compute: F) -> Result<()>
where
    R: Read,
    W: Write,
    F: FnOnce(&mut dyn FnMut(u64)) -> Result<String>,
{
    transport.begin_stream()?;

    // Progress can't fail the computation; the first write error is kept for later.
    let mut write_failure = None;
    let result = compute(&mut |bytes: u64| {
        if write_failure.is_none() {
            if let Err(e) = transport.write_progress(bytes).and_then(|()| transport.flush()) {
                write_failure = Some(e);
            }
        }
    });
    if let Some(e) = write_failure {
        return Err(e);
    }

    match result {
        Ok(digest) => transport.write_value_part(&digest)?,
        Err(e) => transport.write_error_part(&to_remote(e))?,
    }
    transport.end_stream()
}

fn stream_file<R: Read, W: Write>(
    transport: &mut ProtocolTransport<R, W>,
    opened: Result<Box<dyn Read + '_>>,
    buffer: &mut PooledBuffer,
    chunk_size: usize,
) -> Result<()> {
    let mut reader = match opened {
        Ok(reader) => reader,
        Err(e) => return transport.write_error(&to_remote(e)),
    };

    transport.begin_stream()?;
    loop {
        buffer.reset();
        buffer.ensure_capacity(chunk_size);
        let n = match reader.read(&mut buffer.spare_mut()[..chunk_size]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let error = RemoteError::from(e).with_frame(frame!("read_file"));
                transport.write_error_part(&error)?;
                break;
            }
        };
        buffer.commit(n);
        transport.write_data_part(buffer.readable())?;
    }
    buffer.reset();
    transport.end_stream()
}

fn to_remote(err: SyncError) -> RemoteError {
    match err {
        SyncError::Application(remote) => remote,
        other => {
            let kind = if other.is_protocol() {
                RemoteErrorKind::Protocol
            } else {
                RemoteErrorKind::Io
            };
            RemoteError::new(kind, other.to_string()).with_frame(frame!("handle_connection"))
        }
    }
}

/// Data frames of a `TARGET_WRITE_FILE` request, read as a byte stream.
///
/// The first framing or transport failure ends the body: it is kept for
/// [`drain`](Self::drain), and every read after it fails.
struct RequestBody<'a, R: Read, W: Write> {
    transport: &'a mut ProtocolTransport<R, W>,
    buffer: &'a mut PooledBuffer,
    finished: bool,
    failure: Option<SyncError>,
}

impl<'a, R: Read, W: Write> RequestBody<'a, R, W> {
    fn new(transport: &'a mut ProtocolTransport<R, W>, buffer: &'a mut PooledBuffer) -> Self {
        buffer.reset();
        Self {
            transport,
            buffer,
            finished: false,
            failure: None,
        }
    }

    fn next_frame(&mut self) -> Result<()> {
        match self.transport.read_data(self.buffer) {
            Ok(more) => {
                self.finished = !more;
                Ok(())
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Skips whatever the handler did not consume, up to the finish marker.
    fn drain(mut self) -> Result<()> {
        self.buffer.reset();
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        while !self.finished {
            self.next_frame()?;
            self.buffer.reset();
        }
        Ok(())
    }
}

impl<R: Read, W: Write> Read for RequestBody<'_, R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.buffer.is_empty() {
            if let Some(e) = &self.failure {
                return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
            }
            if self.finished {
                return Ok(0);
            }
            if let Err(e) = self.next_frame() {
                self.failure = Some(e);
            }
        }
        Ok(self.buffer.take(buf))
    }
}
