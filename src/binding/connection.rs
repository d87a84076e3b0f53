use std::{
    net::{SocketAddr, TcpStream},
    sync::Arc,
    thread,
};

use log::{debug, warn};

use crate::{
    config::TransportConfig,
    error::Result,
    item::Options,
    protocol::{PROTOCOL_VERSION, ProtocolTransport, Request},
    registry::Registry,
};

pub(crate) type TcpTransport = ProtocolTransport<TcpStream, TcpStream>;

/// One open, handshaken connection to a server.
pub(crate) struct Connection {
    transport: TcpTransport,
}

impl Connection {
    /// Connects to `address`, retrying with exponential backoff, and performs
    /// the `CONNECT` handshake.
    pub(crate) fn open(
        address: SocketAddr,
        config: &TransportConfig,
        options: Options,
        registry: Arc<Registry>,
    ) -> Result<Self> {
        let stream = connect_with_retry(address, config)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.read_timeout)?;

        let reader = stream.try_clone()?;
        let transport = ProtocolTransport::new(reader, stream, registry, config.buffer_size)
            .with_max_frame(config.max_frame);
        let mut connection = Self { transport };

        connection.transport.write_request(&Request::Connect {
            version: PROTOCOL_VERSION,
            options,
        })?;
        connection.transport.read_ack()?;
        debug!("connected to {address}");
        Ok(connection)
    }

    pub(crate) fn transport(&mut self) -> &mut TcpTransport {
        &mut self.transport
    }

    /// Sends `DISCONNECT` and waits for the acknowledgement.
    pub(crate) fn close(mut self) -> Result<()> {
        self.transport.write_request(&Request::Disconnect)?;
        self.transport.read_ack()
    }
}

fn connect_with_retry(address: SocketAddr, config: &TransportConfig) -> Result<TcpStream> {
    let attempts = config.connect_attempts.max(1);
    let mut backoff = config.backoff;
    let mut attempt = 1;

    loop {
        match TcpStream::connect_timeout(&address, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < attempts => {
                warn!("connect to {address} failed (attempt {attempt}/{attempts}): {e}");
                thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
