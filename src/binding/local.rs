use std::{
    collections::HashSet,
    fs::{self, File, ReadDir},
    io::{self, Read},
    path::{Component, Path, PathBuf},
};

use filetime::FileTime;
use log::{debug, info, trace};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::{
    error::{Result, SyncError},
    frame,
    item::{Options, PathFilter, SyncItem},
    remote::{RemoteError, RemoteErrorKind, StackFrame},
};

use super::{ItemStream, Receiver, Sender};

/// Read size while hashing; progress is reported once per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Peer operating on the local filesystem.
///
/// Roots are plain paths; relative paths must stay below their root. With
/// [`Options::dry_run`] set, mutations are logged and skipped.
#[derive(Debug, Clone, Default)]
pub struct LocalPeer {
    options: Options,
}

impl LocalPeer {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    fn enumerate(&self, root: &str, follow_sym_links: bool, filter: &PathFilter) -> ItemStream<'_> {
        match Walk::new(root, follow_sym_links, filter.clone()) {
            Ok(walk) => Box::new(walk),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn checksum(
        &self,
        root: &str,
        relative_path: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<String> {
        digest(&resolve(root, relative_path)?, progress)
    }

    fn dry_run(&self, action: &str, path: &Path) -> bool {
        if self.options.dry_run() {
            info!("dry run: would {action} {}", path.display());
        }
        self.options.dry_run()
    }
}

impl Sender for LocalPeer {
    fn connect(&mut self, address: &str) -> Result<()> {
        debug!("local peer ignores address '{address}'");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn generate_sync_items(
        &self,
        root: &str,
        follow_sym_links: bool,
        filter: &PathFilter,
    ) -> ItemStream<'_> {
        self.enumerate(root, follow_sym_links, filter)
    }

    fn generate_checksum(
        &self,
        root: &str,
        relative_path: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<String> {
        self.checksum(root, relative_path, progress)
    }

    fn read_file(
        &self,
        base_dir: &str,
        relative_file: &str,
        size: u64,
    ) -> Result<Box<dyn Read + '_>> {
        let path = resolve(base_dir, relative_file)?;
        let file = File::open(&path).map_err(|e| failure(e, frame!("read_file")))?;
        trace!("reading {size} bytes from {}", path.display());
        Ok(Box::new(file.take(size)))
    }
}

impl Receiver for LocalPeer {
    fn connect(&mut self, address: &str) -> Result<()> {
        debug!("local peer ignores address '{address}'");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn generate_sync_items(
        &self,
        root: &str,
        follow_sym_links: bool,
        filter: &PathFilter,
    ) -> ItemStream<'_> {
        self.enumerate(root, follow_sym_links, filter)
    }

    fn generate_checksum(
        &self,
        root: &str,
        relative_path: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<String> {
        self.checksum(root, relative_path, progress)
    }

    fn create_directory(&self, root: &str, item: &SyncItem) -> Result<()> {
        let path = resolve(root, item.relative_path())?;
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => return Ok(()),
            Ok(_) => {
                return Err(RemoteError::new(RemoteErrorKind::NotADirectory, "Not a directory")
                    .with_frame(frame!("create_directory"))
                    .into());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(failure(e, frame!("create_directory"))),
        }

        if self.dry_run("create directory", &path) {
            return Ok(());
        }
        fs::create_dir_all(&path).map_err(|e| failure(e, frame!("create_directory")))?;
        debug!("created directory {}", path.display());
        Ok(())
    }

    fn delete(&self, root: &str, item: &SyncItem) -> Result<()> {
        let path = resolve(root, item.relative_path())?;
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("{} already gone", path.display());
                return Ok(());
            }
            Err(e) => return Err(failure(e, frame!("delete"))),
        };

        if self.dry_run("delete", &path) {
            return Ok(());
        }
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| failure(e, frame!("delete")))?;
        debug!("deleted {}", path.display());
        Ok(())
    }

    fn update(&self, root: &str, item: &SyncItem) -> Result<()> {
        let path = resolve(root, item.relative_path())?;
        if self.dry_run("update", &path) {
            return Ok(());
        }

        if let Some(permissions) = item.permissions() {
            apply_permissions(&path, permissions)?;
        }

        let millis = item.last_modified();
        let mtime = FileTime::from_unix_time(
            millis.div_euclid(1000),
            (millis.rem_euclid(1000) * 1_000_000) as u32,
        );
        filetime::set_file_mtime(&path, mtime).map_err(|e| failure(e, frame!("update")))?;
        Ok(())
    }

    fn validate_file(&self, root: &str, item: &SyncItem) -> Result<()> {
        let path = resolve(root, item.relative_path())?;
        let metadata = fs::metadata(&path).map_err(|e| failure(e, frame!("validate_file")))?;

        if !metadata.is_file() {
            return Err(invalid_data(
                format!("'{}' is not a regular file", item.relative_path()),
                frame!("validate_file"),
            ));
        }
        if metadata.len() != item.size() {
            return Err(invalid_data(
                format!(
                    "size mismatch for '{}': expected {}, found {}",
                    item.relative_path(),
                    item.size(),
                    metadata.len()
                ),
                frame!("validate_file"),
            ));
        }

        if let (true, Some(expected)) = (self.options.checksum(), item.checksum()) {
            let actual = digest(&path, &mut |_| {})?;
            if actual != expected {
                return Err(invalid_data(
                    format!("checksum mismatch for '{}'", item.relative_path()),
                    frame!("validate_file"),
                ));
            }
        }
        Ok(())
    }

    fn write_file(
        &self,
        base_dir: &str,
        relative_file: &str,
        size: u64,
        data: &mut dyn Read,
    ) -> Result<()> {
        let path = resolve(base_dir, relative_file)?;
        if self.dry_run("write", &path) {
            io::copy(data, &mut io::sink()).map_err(|e| failure(e, frame!("write_file")))?;
            return Ok(());
        }

        let parent = path.parent().unwrap_or_else(|| Path::new(base_dir));
        fs::create_dir_all(parent).map_err(|e| failure(e, frame!("write_file")))?;

        // Goes to a sibling temp file so a short transfer never clobbers the original.
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| failure(e, frame!("write_file")))?;
        let written = io::copy(data, &mut temp).map_err(|e| failure(e, frame!("write_file")))?;
        if written != size {
            return Err(invalid_data(
                format!("expected {size} bytes for '{relative_file}', received {written}"),
                frame!("write_file"),
            ));
        }

        temp.persist(&path)
            .map_err(|e| failure(e.error, frame!("write_file")))?;
        debug!("wrote {written} bytes to {}", path.display());
        Ok(())
    }
}

/// Depth-first walk yielding one item per directory and regular file.
struct Walk {
    follow_sym_links: bool,
    filter: PathFilter,
    pending: Vec<(String, ReadDir)>,
    visited: HashSet<PathBuf>,
}

impl Walk {
    fn new(root: &str, follow_sym_links: bool, filter: PathFilter) -> Result<Self> {
        let root = Path::new(root);
        let entries = fs::read_dir(root).map_err(|e| failure(e, frame!("generate_sync_items")))?;

        let mut visited = HashSet::new();
        if follow_sym_links {
            let canonical =
                fs::canonicalize(root).map_err(|e| failure(e, frame!("generate_sync_items")))?;
            visited.insert(canonical);
        }

        Ok(Self {
            follow_sym_links,
            filter,
            pending: vec![(String::new(), entries)],
            visited,
        })
    }

    fn visit(&mut self, path: &Path, relative: String, name: &str) -> Result<Option<SyncItem>> {
        let mut metadata =
            fs::symlink_metadata(path).map_err(|e| failure(e, frame!("generate_sync_items")))?;

        if metadata.file_type().is_symlink() {
            if !self.follow_sym_links {
                trace!("skipping symlink {}", path.display());
                return Ok(None);
            }
            metadata = match fs::metadata(path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("skipping dangling symlink {}", path.display());
                    return Ok(None);
                }
                Err(e) => return Err(failure(e, frame!("generate_sync_items"))),
            };
        }

        if metadata.is_dir() {
            if self.filter.excludes_dir(name) {
                return Ok(None);
            }
            if self.follow_sym_links {
                let canonical = fs::canonicalize(path)
                    .map_err(|e| failure(e, frame!("generate_sync_items")))?;
                if !self.visited.insert(canonical) {
                    debug!("skipping already visited directory {}", path.display());
                    return Ok(None);
                }
            }
            let entries =
                fs::read_dir(path).map_err(|e| failure(e, frame!("generate_sync_items")))?;
            let item = describe(relative.clone(), &metadata)?;
            self.pending.push((relative, entries));
            Ok(Some(item))
        } else if metadata.is_file() {
            if self.filter.excludes_file(name) {
                return Ok(None);
            }
            describe(relative, &metadata).map(Some)
        } else {
            trace!("skipping special file {}", path.display());
            Ok(None)
        }
    }
}

impl Iterator for Walk {
    type Item = Result<SyncItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (dir, entries) = self.pending.last_mut()?;
            let entry = match entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => return Some(Err(failure(e, frame!("generate_sync_items")))),
                None => {
                    self.pending.pop();
                    continue;
                }
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                debug!("skipping non UTF-8 name {}", entry.path().display());
                continue;
            };
            let relative = if dir.is_empty() {
                name.to_string()
            } else {
                format!("{dir}/{name}")
            };

            match self.visit(&entry.path(), relative, name) {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn describe(relative: String, metadata: &fs::Metadata) -> Result<SyncItem> {
    let mtime = FileTime::from_last_modification_time(metadata);
    let last_modified = mtime.unix_seconds() * 1000 + i64::from(mtime.nanoseconds() / 1_000_000);

    let item = if metadata.is_dir() {
        SyncItem::directory(relative, last_modified)
    } else {
        SyncItem::file(relative, metadata.len(), last_modified)
    }
    .map_err(|e| invalid_data(e.to_string(), frame!("generate_sync_items")))?;

    Ok(with_ownership(item, metadata))
}

#[cfg(unix)]
fn with_ownership(item: SyncItem, metadata: &fs::Metadata) -> SyncItem {
    use std::os::unix::fs::MetadataExt;

    item.with_permissions(mode_string(metadata.mode()))
        .with_user(principal(metadata.uid()))
        .with_group(principal(metadata.gid()))
}

/// Names are not resolved; the numeric id doubles as the name. Ids past
/// `i32::MAX` have no wire form and become `unknown`.
#[cfg(unix)]
fn principal(id: u32) -> crate::item::Principal {
    use crate::item::Principal;

    match i32::try_from(id) {
        Ok(wire_id) => Principal::new(id.to_string(), wire_id),
        Err(_) => {
            debug!("owner id {id} does not fit the wire format");
            Principal::new("unknown", -1)
        }
    }
}

#[cfg(not(unix))]
fn with_ownership(item: SyncItem, _: &fs::Metadata) -> SyncItem {
    item
}

#[cfg(unix)]
const MODE_BITS: [(u32, char); 9] = [
    (0o400, 'r'),
    (0o200, 'w'),
    (0o100, 'x'),
    (0o040, 'r'),
    (0o020, 'w'),
    (0o010, 'x'),
    (0o004, 'r'),
    (0o002, 'w'),
    (0o001, 'x'),
];

/// `0o754` as `rwxr-xr--`.
#[cfg(unix)]
fn mode_string(mode: u32) -> String {
    MODE_BITS
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}

#[cfg(unix)]
fn parse_mode(permissions: &str) -> Option<u32> {
    let chars: Vec<char> = permissions.chars().collect();
    if chars.len() != MODE_BITS.len() {
        return None;
    }

    MODE_BITS
        .iter()
        .zip(chars)
        .try_fold(0, |mode, (&(bit, expected), c)| match c {
            '-' => Some(mode),
            c if c == expected => Some(mode | bit),
            _ => None,
        })
}

#[cfg(unix)]
fn apply_permissions(path: &Path, permissions: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let Some(mode) = parse_mode(permissions) else {
        return Err(RemoteError::new(
            RemoteErrorKind::InvalidInput,
            format!("invalid permissions '{permissions}'"),
        )
        .with_frame(frame!("update"))
        .into());
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| failure(e, frame!("update")))
}

#[cfg(not(unix))]
fn apply_permissions(path: &Path, permissions: &str) -> Result<()> {
    trace!("ignoring permissions '{permissions}' for {}", path.display());
    Ok(())
}

/// SHA-256 of the file as lowercase hex.
fn digest(path: &Path, progress: &mut dyn FnMut(u64)) -> Result<String> {
    let mut file = File::open(path).map_err(|e| failure(e, frame!("generate_checksum")))?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0; CHUNK_SIZE];
    let mut total = 0;

    loop {
        let n = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(failure(e, frame!("generate_checksum"))),
        };
        hasher.update(&chunk[..n]);
        total += n as u64;
        progress(total);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Joins `relative` onto `root`, refusing anything that could leave the root.
fn resolve(root: &str, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let contained = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if relative.is_empty() || !contained {
        return Err(RemoteError::new(
            RemoteErrorKind::InvalidInput,
            format!("path '{relative}' is not relative to its root"),
        )
        .with_frame(frame!("resolve"))
        .into());
    }
    Ok(Path::new(root).join(path))
}

fn failure(err: io::Error, frame: StackFrame) -> SyncError {
    RemoteError::from(err).with_frame(frame).into()
}

fn invalid_data(message: String, frame: StackFrame) -> SyncError {
    RemoteError::new(RemoteErrorKind::InvalidData, message)
        .with_frame(frame)
        .into()
}
