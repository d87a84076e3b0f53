use std::{
    fs,
    io::{Cursor, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use syncwire::{
    Options, PathFilter, Registry, RemoteError, RemoteErrorKind, SyncItem,
    binding::{Receiver, Sender, SyncServer, TcpReceiver, TcpSender},
    config::{ServerConfig, TransportConfig},
    pool::PooledBuffer,
    protocol::{PROTOCOL_VERSION, ProtocolTransport, Request, Status},
};
use tempdir::TempDir;

const DIGEST: &str = "d41d8cd98f00b204e9800998ecf8427e";

struct TestServer {
    address: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        Self::with_config(ServerConfig {
            workers: 2,
            ..ServerConfig::default()
        })
    }

    fn with_config(config: ServerConfig) -> Self {
        let server = SyncServer::bind("127.0.0.1:0", config).unwrap();
        let address = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = thread::spawn(move || server.listen().unwrap());

        Self {
            address,
            shutdown,
            handle: Some(handle),
        }
    }

    fn address(&self) -> String {
        self.address.to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

fn client_config() -> TransportConfig {
    TransportConfig {
        connect_attempts: 1,
        ..TransportConfig::default()
    }
}

fn root_of(dir: &TempDir) -> &str {
    dir.path().to_str().unwrap()
}

#[test]
fn checksum_progress_arrives_before_digest() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let script = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let reader = stream.try_clone().unwrap();
        let mut transport =
            ProtocolTransport::new(reader, stream, Arc::new(Registry::standard()), 1024);

        let connect = transport.read_request().unwrap();
        assert!(matches!(connect, Some(Request::Connect { .. })));
        transport.write_ok(&[]).unwrap();

        assert_eq!(
            transport.read_request().unwrap(),
            Some(Request::SourceChecksum {
                root: "/data".to_string(),
                path: "a/b.txt".to_string(),
            })
        );
        transport.begin_stream().unwrap();
        for progress in [4096, 8192, 8192] {
            transport.write_progress(progress).unwrap();
        }
        transport.write_value_part(&DIGEST.to_string()).unwrap();
        transport.end_stream().unwrap();

        assert_eq!(transport.read_request().unwrap(), Some(Request::Disconnect));
        transport.write_ok(&[]).unwrap();
    });

    let mut sender = TcpSender::new(client_config(), Options::default());
    sender.connect(&address.to_string()).unwrap();

    let mut seen = Vec::new();
    let digest = sender
        .generate_checksum("/data", "a/b.txt", &mut |bytes| seen.push(bytes))
        .unwrap();

    assert_eq!(seen, [4096, 8192, 8192]);
    assert_eq!(digest, DIGEST);

    sender.disconnect().unwrap();
    script.join().unwrap();
}

#[test]
fn unknown_opcode_is_answered_then_dropped() {
    let server = TestServer::start();
    let mut stream = TcpStream::connect(server.address).unwrap();

    let mut frame = Vec::new();
    frame.extend_from_slice(&17i32.to_be_bytes());
    frame.extend_from_slice(&13i32.to_be_bytes());
    frame.extend_from_slice(b"SELF_DESTRUCT");
    stream.write_all(&frame).unwrap();

    let reader = stream.try_clone().unwrap();
    let mut transport =
        ProtocolTransport::new(reader, stream, Arc::new(Registry::standard()), 1024);
    let header = transport.read_header().unwrap();
    assert_eq!(header.status, Status::Error);

    let error = transport.read_remote_error(&header).unwrap();
    assert_eq!(error.kind(), RemoteErrorKind::Protocol);
    assert!(error.message().contains("SELF_DESTRUCT"));

    let closed = transport.read_header().unwrap_err();
    assert!(closed.is_transport());
}

#[test]
fn failed_mutation_keeps_connection_pooled() {
    let server = TestServer::start();
    let dir = TempDir::new("mkdir").unwrap();
    fs::write(dir.path().join("blocker"), b"x").unwrap();

    let mut receiver = TcpReceiver::new(client_config(), Options::default());
    receiver.connect(&server.address()).unwrap();

    let item = SyncItem::directory("blocker", 0).unwrap();
    let err = receiver.create_directory(root_of(&dir), &item).unwrap_err();
    let remote = err.remote().unwrap();
    assert_eq!(remote.kind(), RemoteErrorKind::NotADirectory);
    assert_eq!(remote.message(), "Not a directory");
    assert!(!remote.frames().is_empty());

    let stats = receiver.client().stats();
    assert_eq!(stats.idle_connections, 1);
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.active_buffers, 0);
    assert!(stats.idle_buffers >= 1);

    receiver.client().ping().unwrap();
    receiver.disconnect().unwrap();
}

#[test]
fn lists_items_with_filter() {
    let server = TestServer::start();
    let dir = TempDir::new("list").unwrap();
    fs::create_dir_all(dir.path().join("docs/target")).unwrap();
    fs::write(dir.path().join("docs/readme.md"), b"hello").unwrap();
    fs::write(dir.path().join("docs/target/out.o"), b"obj").unwrap();
    fs::write(dir.path().join("notes.tmp"), b"scratch").unwrap();

    let mut sender = TcpSender::new(client_config(), Options::default());
    sender.connect(&server.address()).unwrap();

    let filter = PathFilter::new().exclude_dir("target").exclude_suffix(".tmp");
    let mut items = sender
        .generate_sync_items(root_of(&dir), false, &filter)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    items.sort_by(|a, b| a.relative_path().cmp(b.relative_path()));

    let paths: Vec<_> = items.iter().map(SyncItem::relative_path).collect();
    assert_eq!(paths, ["docs", "docs/readme.md"]);
    assert!(items[0].is_directory());
    assert_eq!(items[1].size(), 5);

    sender.disconnect().unwrap();
}

#[test]
fn missing_root_ends_enumeration_with_error() {
    let server = TestServer::start();
    let dir = TempDir::new("missing").unwrap();
    let root = dir.path().join("nope");

    let mut receiver = TcpReceiver::new(client_config(), Options::default());
    receiver.connect(&server.address()).unwrap();

    let results: Vec<_> = receiver
        .generate_sync_items(root.to_str().unwrap(), false, &PathFilter::new())
        .collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].as_ref().unwrap_err().remote().is_some());
    assert_eq!(receiver.client().stats().active_connections, 0);

    receiver.disconnect().unwrap();
}

#[test]
fn file_round_trip() {
    let server = TestServer::start();
    let target = TempDir::new("target").unwrap();
    let content = b"hello".repeat(40_000);

    let options = Options::builder().checksum(true).build();
    let mut receiver = TcpReceiver::new(client_config(), options);
    receiver.connect(&server.address()).unwrap();

    let size = content.len() as u64;
    receiver
        .write_file(root_of(&target), "nested/data.bin", size, &mut Cursor::new(&content))
        .unwrap();
    assert_eq!(
        fs::read(target.path().join("nested/data.bin")).unwrap(),
        content
    );

    let mut sender = TcpSender::new(client_config(), options);
    sender.connect(&server.address()).unwrap();

    let mut read_back = Vec::new();
    sender
        .read_file(root_of(&target), "nested/data.bin", size)
        .unwrap()
        .read_to_end(&mut read_back)
        .unwrap();
    assert_eq!(read_back, content);

    let mut last_progress = 0;
    let digest = sender
        .generate_checksum(root_of(&target), "nested/data.bin", &mut |bytes| {
            last_progress = bytes
        })
        .unwrap();
    assert_eq!(digest.len(), 64);
    assert_eq!(last_progress, size);

    let item = SyncItem::file("nested/data.bin", size, 1_600_000_000_000)
        .unwrap()
        .with_checksum(digest);
    receiver.update(root_of(&target), &item).unwrap();
    receiver.validate_file(root_of(&target), &item).unwrap();

    let short = SyncItem::file("nested/data.bin", size + 1, 0).unwrap();
    let err = receiver.validate_file(root_of(&target), &short).unwrap_err();
    assert_eq!(err.remote().unwrap().kind(), RemoteErrorKind::InvalidData);

    sender.disconnect().unwrap();
    receiver.disconnect().unwrap();
}

#[test]
fn short_upload_leaves_target_untouched() {
    let server = TestServer::start();
    let target = TempDir::new("target").unwrap();
    fs::write(target.path().join("data.bin"), b"original").unwrap();

    let mut receiver = TcpReceiver::new(client_config(), Options::default());
    receiver.connect(&server.address()).unwrap();

    let err = receiver
        .write_file(root_of(&target), "data.bin", 100, &mut Cursor::new(b"short"))
        .unwrap_err();
    assert_eq!(err.remote().unwrap().kind(), RemoteErrorKind::InvalidData);
    assert_eq!(fs::read(target.path().join("data.bin")).unwrap(), b"original");

    receiver.client().ping().unwrap();
    receiver.disconnect().unwrap();
}

#[test]
fn delete_and_dry_run() {
    let server = TestServer::start();
    let target = TempDir::new("delete").unwrap();
    fs::create_dir_all(target.path().join("old/deep")).unwrap();
    fs::write(target.path().join("old/deep/file"), b"x").unwrap();
    let item = SyncItem::directory("old", 0).unwrap();

    let dry = Options::builder().dry_run(true).build();
    let mut receiver = TcpReceiver::new(client_config(), dry);
    receiver.connect(&server.address()).unwrap();
    receiver.delete(root_of(&target), &item).unwrap();
    assert!(target.path().join("old/deep/file").exists());
    receiver.disconnect().unwrap();

    let mut receiver = TcpReceiver::new(client_config(), Options::default());
    receiver.connect(&server.address()).unwrap();
    receiver.delete(root_of(&target), &item).unwrap();
    assert!(!target.path().join("old").exists());

    receiver.delete(root_of(&target), &item).unwrap();
    receiver.disconnect().unwrap();
}

#[test]
fn dropped_stream_discards_its_connection() {
    let server = TestServer::start();
    let dir = TempDir::new("drop").unwrap();
    for i in 0..10 {
        fs::write(dir.path().join(format!("f{i}")), b"x").unwrap();
    }

    let mut sender = TcpSender::new(client_config(), Options::default());
    sender.connect(&server.address()).unwrap();

    let mut items = sender.generate_sync_items(root_of(&dir), false, &PathFilter::new());
    assert!(items.next().unwrap().is_ok());
    drop(items);

    let stats = sender.client().stats();
    assert_eq!(stats.idle_connections, 0);
    assert_eq!(stats.active_connections, 0);

    sender.client().ping().unwrap();
    assert_eq!(sender.client().stats().idle_connections, 1);
    sender.disconnect().unwrap();
}

#[test]
fn connect_fails_without_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let mut sender = TcpSender::new(client_config(), Options::default());
    let err = sender.connect(&address.to_string()).unwrap_err();
    assert!(err.is_transport());
    assert!(!sender.client().is_connected());
}

#[test]
fn rejected_handshake_is_an_application_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let script = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let reader = stream.try_clone().unwrap();
        let mut transport =
            ProtocolTransport::new(reader, stream, Arc::new(Registry::standard()), 1024);

        let connect = transport.read_request().unwrap();
        assert!(matches!(connect, Some(Request::Connect { .. })));
        let error = RemoteError::new(RemoteErrorKind::Protocol, "version 99 unsupported");
        transport.write_error(&error).unwrap();
    });

    let mut sender = TcpSender::new(client_config(), Options::default());
    let err = sender.connect(&address.to_string()).unwrap_err();
    script.join().unwrap();

    let remote = err.remote().unwrap();
    assert_eq!(remote.kind(), RemoteErrorKind::Protocol);
    assert_eq!(remote.message(), "version 99 unsupported");
    assert!(!err.is_transport());
    assert!(!sender.client().is_connected());
}

#[test]
fn oversized_upload_frame_closes_the_connection() {
    let server = TestServer::with_config(ServerConfig {
        workers: 1,
        max_frame: 1024,
        ..ServerConfig::default()
    });
    let target = TempDir::new("oversized").unwrap();

    let stream = TcpStream::connect(server.address).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut raw = stream.try_clone().unwrap();
    let reader = stream.try_clone().unwrap();
    let mut transport =
        ProtocolTransport::new(reader, stream, Arc::new(Registry::standard()), 1024);

    transport
        .write_request(&Request::Connect {
            version: PROTOCOL_VERSION,
            options: Options::default(),
        })
        .unwrap();
    transport.read_ack().unwrap();

    transport
        .begin_request(&Request::TargetWriteFile {
            base_dir: root_of(&target).to_string(),
            file: "data.bin".to_string(),
            size: 2000,
        })
        .unwrap();
    transport.flush().unwrap();
    raw.write_all(&2000i32.to_be_bytes()).unwrap();

    let header = transport.read_header().unwrap();
    assert_eq!(header.status, Status::Error);
    let error = transport.read_remote_error(&header).unwrap();
    assert_eq!(error.kind(), RemoteErrorKind::Protocol);
    assert!(!target.path().join("data.bin").exists());

    let closed = transport.read_header().unwrap_err();
    assert!(closed.is_transport());
}

#[test]
fn concurrent_reads_use_distinct_connections() {
    let server = TestServer::with_config(ServerConfig {
        workers: 4,
        ..ServerConfig::default()
    });
    let dir = TempDir::new("concurrent").unwrap();
    let content = b"0123456789".repeat(10_000);
    fs::write(dir.path().join("shared.bin"), &content).unwrap();

    let config = TransportConfig {
        max_connections: 4,
        ..client_config()
    };
    let mut sender = TcpSender::new(config, Options::default());
    sender.connect(&server.address()).unwrap();

    let readers = 3;
    let opened = Barrier::new(readers + 1);
    let counted = Barrier::new(readers + 1);
    let size = content.len() as u64;

    thread::scope(|scope| {
        for _ in 0..readers {
            scope.spawn(|| {
                let mut reader = sender.read_file(root_of(&dir), "shared.bin", size).unwrap();
                opened.wait();
                counted.wait();

                let mut read_back = Vec::new();
                reader.read_to_end(&mut read_back).unwrap();
                assert_eq!(read_back, content);
            });
        }

        opened.wait();
        assert_eq!(sender.client().stats().active_connections, readers);
        counted.wait();
    });

    let stats = sender.client().stats();
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.idle_connections, readers);
    assert_eq!(stats.active_buffers, 0);

    sender.disconnect().unwrap();
}

#[test]
fn trailing_bytes_after_digest_are_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let script = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let reader = stream.try_clone().unwrap();
        let registry = Arc::new(Registry::standard());
        let mut transport = ProtocolTransport::new(reader, stream, Arc::clone(&registry), 1024);

        assert!(matches!(
            transport.read_request().unwrap(),
            Some(Request::Connect { .. })
        ));
        transport.write_ok(&[]).unwrap();

        assert!(matches!(
            transport.read_request().unwrap(),
            Some(Request::SourceChecksum { .. })
        ));
        let mut payload = PooledBuffer::with_capacity(64);
        registry.encode(&DIGEST.to_string(), &mut payload).unwrap();
        payload.put(&[0xFF]);
        transport.begin_stream().unwrap();
        transport.write_data_part(payload.readable()).unwrap();
        transport.end_stream().unwrap();
    });

    let mut sender = TcpSender::new(client_config(), Options::default());
    sender.connect(&address.to_string()).unwrap();

    let err = sender
        .generate_checksum("/data", "a/b.txt", &mut |_| {})
        .unwrap_err();
    assert!(err.is_protocol());
    assert_eq!(sender.client().stats().idle_connections, 0);

    script.join().unwrap();
}
