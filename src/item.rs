//! Values exchanged by the sync operations.
//!
//! - [`SyncItem`]: metadata of one file or directory, keyed by its path
//!   relative to the synchronized root.
//! - [`Options`]: session flags, frozen once built.
//! - [`PathFilter`]: names excluded from enumeration.
use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("sync item path must not be empty")]
pub struct EmptyPathError;

/// Named owner of a file, either a user or a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub name: String,
    pub id: i32,
}

impl Principal {
    pub fn new(name: impl Into<String>, id: i32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    relative_path: String,
    is_file: bool,
    size: u64,
    last_modified: i64,
    permissions: Option<String>,
    group: Option<Principal>,
    user: Option<Principal>,
    checksum: Option<String>,
}

impl SyncItem {
    pub fn new(
        relative_path: impl Into<String>,
        is_file: bool,
        size: u64,
        last_modified: i64,
    ) -> Result<Self, EmptyPathError> {
        let relative_path = relative_path.into();
        if relative_path.is_empty() {
            return Err(EmptyPathError);
        }

        Ok(Self {
            relative_path,
            is_file,
            size,
            last_modified,
            permissions: None,
            group: None,
            user: None,
            checksum: None,
        })
    }

    pub fn file(
        relative_path: impl Into<String>,
        size: u64,
        last_modified: i64,
    ) -> Result<Self, EmptyPathError> {
        Self::new(relative_path, true, size, last_modified)
    }

    pub fn directory(
        relative_path: impl Into<String>,
        last_modified: i64,
    ) -> Result<Self, EmptyPathError> {
        Self::new(relative_path, false, 0, last_modified)
    }

    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }

    pub fn with_group(mut self, group: Principal) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_user(mut self, user: Principal) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_directory(&self) -> bool {
        !self.is_file
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification time in milliseconds since the Unix epoch.
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn permissions(&self) -> Option<&str> {
        self.permissions.as_deref()
    }

    pub fn group(&self) -> Option<&Principal> {
        self.group.as_ref()
    }

    pub fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }
}

/// Session flags. Build with [`Options::builder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    checksum: bool,
    delete: bool,
    dry_run: bool,
    follow_sym_links: bool,
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Compare file digests, not only size and modification time.
    pub fn checksum(&self) -> bool {
        self.checksum
    }

    /// Remove target entries missing on the source.
    pub fn delete(&self) -> bool {
        self.delete
    }

    /// Report mutations without applying them.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn follow_sym_links(&self) -> bool {
        self.follow_sym_links
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsBuilder {
    inner: Options,
}

impl OptionsBuilder {
    pub fn checksum(mut self, value: bool) -> Self {
        self.inner.checksum = value;
        self
    }

    pub fn delete(mut self, value: bool) -> Self {
        self.inner.delete = value;
        self
    }

    pub fn dry_run(mut self, value: bool) -> Self {
        self.inner.dry_run = value;
        self
    }

    pub fn follow_sym_links(mut self, value: bool) -> Self {
        self.inner.follow_sym_links = value;
        self
    }

    pub fn build(self) -> Options {
        self.inner
    }
}

/// Directory names and file suffixes skipped during enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFilter {
    excluded_dirs: HashSet<String>,
    excluded_suffixes: HashSet<String>,
}

impl PathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude_dir(mut self, name: impl Into<String>) -> Self {
        self.excluded_dirs.insert(name.into());
        self
    }

    pub fn exclude_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.excluded_suffixes.insert(suffix.into());
        self
    }

    pub fn excluded_dirs(&self) -> &HashSet<String> {
        &self.excluded_dirs
    }

    pub fn excluded_suffixes(&self) -> &HashSet<String> {
        &self.excluded_suffixes
    }

    pub fn is_empty(&self) -> bool {
        self.excluded_dirs.is_empty() && self.excluded_suffixes.is_empty()
    }

    pub fn excludes_dir(&self, name: &str) -> bool {
        self.excluded_dirs.contains(name)
    }

    pub fn excludes_file(&self, name: &str) -> bool {
        self.excluded_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }
}
