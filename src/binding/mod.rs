//! Sender/Receiver contract and its bindings.
//!
//! The sync engine talks to both ends of a transfer through two traits:
//!
//! - [`Sender`]: the source side. Enumerates items, computes checksums and
//!   serves file contents.
//! - [`Receiver`]: the target side. Enumerates and checksums the same way, and
//!   applies mutations (directories, deletes, metadata updates, file writes).
//!
//! A call looks the same whether the peer is [`LocalPeer`] (in-process, on the
//! local filesystem) or a remote process reached through [`TcpSender`] or
//! [`TcpReceiver`]. The remote process runs a [`SyncServer`], which executes
//! every request against a `LocalPeer`.
//!
//! # Example
//! ```rust,no_run
//! use syncwire::{
//!     Options, PathFilter,
//!     binding::{Sender, TcpSender},
//!     config::TransportConfig,
//! };
//!
//! let mut sender = TcpSender::new(TransportConfig::default(), Options::default());
//! sender.connect("127.0.0.1:7878")?;
//!
//! for item in sender.generate_sync_items("/srv/data", false, &PathFilter::new()) {
//!     println!("{}", item?.relative_path());
//! }
//!
//! sender.disconnect()?;
//! # Ok::<(), syncwire::SyncError>(())
//! ```
mod client;
mod connection;
mod local;
mod server;
mod thread;

use std::io::Read;

use crate::{
    error::Result,
    item::{PathFilter, SyncItem},
};

pub use client::{PoolStats, TcpClient, TcpReceiver, TcpSender};
pub use local::LocalPeer;
pub use server::SyncServer;

/// Lazy sequence of items produced by an enumeration. Items come in no
/// particular order.
pub type ItemStream<'a> = Box<dyn Iterator<Item = Result<SyncItem>> + 'a>;

/// Source side of a transfer.
pub trait Sender {
    fn connect(&mut self, address: &str) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    fn generate_sync_items(
        &self,
        root: &str,
        follow_sym_links: bool,
        filter: &PathFilter,
    ) -> ItemStream<'_>;

    /// Digest of one file. `progress` receives the running byte count.
    fn generate_checksum(
        &self,
        root: &str,
        relative_path: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<String>;

    /// The first `size` bytes of `relative_file`, read lazily.
    fn read_file(
        &self,
        base_dir: &str,
        relative_file: &str,
        size: u64,
    ) -> Result<Box<dyn Read + '_>>;
}

/// Target side of a transfer.
pub trait Receiver {
    fn connect(&mut self, address: &str) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    fn generate_sync_items(
        &self,
        root: &str,
        follow_sym_links: bool,
        filter: &PathFilter,
    ) -> ItemStream<'_>;

    fn generate_checksum(
        &self,
        root: &str,
        relative_path: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<String>;

    fn create_directory(&self, root: &str, item: &SyncItem) -> Result<()>;

    /// Removes the item. Deleting something already gone succeeds.
    fn delete(&self, root: &str, item: &SyncItem) -> Result<()>;

    /// Applies the item's modification time and permissions.
    fn update(&self, root: &str, item: &SyncItem) -> Result<()>;

    /// Fails unless the file matches the item's size (and checksum, when the
    /// session compares checksums).
    fn validate_file(&self, root: &str, item: &SyncItem) -> Result<()>;

    /// Replaces `relative_file` with exactly `size` bytes read from `data`.
    fn write_file(
        &self,
        base_dir: &str,
        relative_file: &str,
        size: u64,
        data: &mut dyn Read,
    ) -> Result<()>;
}
