//! Datasets mirrored under the local root
//!
//! The layout is `<root>/<scope>/<group>/<dataset>/...` with one of the fixed [`SCOPES`].
//! Hidden entries (names starting with a dot) are skipped at the group and dataset levels
//! but are counted in dataset sizes.

use async_recursion::async_recursion;
use tracing::instrument;

use crate::error::Error;
use crate::manifest::{Filter, Manifest};
use crate::prune;

/// Scope directories scanned under the local root
pub const SCOPES: [&str; 3] = ["Private", "Protected", "Public"];

/// A dataset present on local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub name: String,
    pub path: std::path::PathBuf,
    pub accessed: std::time::SystemTime,
    pub modified: std::time::SystemTime,
    /// Total size of the files below `path`, hidden ones included
    pub size: u64,
}

impl std::fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "  path: {}", self.path.display())?;
        writeln!(f, "  atime: {}", common::format_time(self.accessed))?;
        writeln!(f, "  mtime: {}", common::format_time(self.modified))?;
        writeln!(f, "  size: {}", common::format_size(self.size))
    }
}

/// Attribute used to order cache listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Size,
    Atime,
    Mtime,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "size" => Ok(SortKey::Size),
            "atime" => Ok(SortKey::Atime),
            "mtime" => Ok(SortKey::Mtime),
            _ => Err(format!("can't sort by attribute: '{s}'")),
        }
    }
}

impl SortKey {
    fn compare(self, a: &CacheEntry, b: &CacheEntry) -> std::cmp::Ordering {
        match self {
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Atime => a.accessed.cmp(&b.accessed),
            SortKey::Mtime => a.modified.cmp(&b.modified),
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Sum of the sizes of everything below `path`; links are counted by their own size
#[async_recursion]
async fn dir_size(path: &std::path::Path) -> Result<u64, Error> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .map_err(Error::io(path))?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    let mut entries = tokio::fs::read_dir(path).await.map_err(Error::io(path))?;
    let mut total = 0;
    while let Some(entry) = entries.next_entry().await.map_err(Error::io(path))? {
        total += child_size(&entry.path()).await?;
    }
    Ok(total)
}

/// Like [`dir_size`], but an entry that vanished after it was listed counts as empty
async fn child_size(path: &std::path::Path) -> Result<u64, Error> {
    match dir_size(path).await {
        Err(Error::MissingPath(_)) => {
            tracing::debug!("{:?} disappeared while scanning", path);
            Ok(0)
        }
        result => result,
    }
}

/// Visible subdirectories of `path`, sorted by name
async fn subdirectories(
    path: &std::path::Path,
) -> Result<Vec<(String, std::path::PathBuf)>, Error> {
    let mut entries = tokio::fs::read_dir(path).await.map_err(Error::io(path))?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(Error::io(path))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }
        let file_type = entry.file_type().await.map_err(Error::io(&entry.path()))?;
        if !file_type.is_dir() {
            tracing::debug!("ignoring non-directory {:?}", entry.path());
            continue;
        }
        found.push((name, entry.path()));
    }
    found.sort();
    Ok(found)
}

/// Snapshot of the datasets found under the local root
#[derive(Debug, Clone, Default)]
pub struct CacheIndex {
    root: std::path::PathBuf,
    entries: Vec<CacheEntry>,
}

impl CacheIndex {
    /// Walk every scope under `root`; missing scope directories are skipped
    #[instrument]
    pub async fn rescan(root: &std::path::Path) -> Result<Self, Error> {
        tracing::info!("detecting cached datasets");
        let mut entries = Vec::new();
        for scope in SCOPES {
            let scope_path = root.join(scope);
            match tokio::fs::metadata(&scope_path).await {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => continue,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(Error::io(&scope_path)(error)),
            }
            for (group, group_path) in subdirectories(&scope_path).await? {
                for (name, _) in subdirectories(&group_path).await? {
                    entries.push(Self::scan_dataset(root, scope, &group, &name).await?);
                }
            }
        }
        tracing::info!("{} datasets cached locally", entries.len());
        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    /// Metadata of one cached dataset
    pub async fn scan_dataset(
        root: &std::path::Path,
        scope: &str,
        group: &str,
        name: &str,
    ) -> Result<CacheEntry, Error> {
        let path = root.join(scope).join(group).join(name);
        let metadata = tokio::fs::metadata(&path).await.map_err(Error::io(&path))?;
        if !metadata.is_dir() {
            return Err(Error::MissingPath(path));
        }
        let accessed = metadata.accessed().map_err(Error::io(&path))?;
        let modified = metadata.modified().map_err(Error::io(&path))?;
        let size = dir_size(&path).await?;
        tracing::debug!("{:?}: {} bytes", path, size);
        Ok(CacheEntry {
            name: name.to_string(),
            path,
            accessed,
            modified,
            size,
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn lookup(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Cached datasets whose manifest record passes `filter`
    ///
    /// Scope and group come from the manifest; cached names it does not know are skipped.
    pub fn list(&self, manifest: &Manifest, filter: &Filter) -> Vec<&CacheEntry> {
        self.entries
            .iter()
            .filter(|entry| match manifest.lookup(&entry.name) {
                Some(record) => filter.matches(record),
                None => {
                    tracing::warn!("cached dataset '{}' is not in the manifest", entry.name);
                    false
                }
            })
            .collect()
    }

    pub fn sorted(&self, key: SortKey, reverse: bool) -> Vec<&CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.iter().collect();
        sort_entries(&mut entries, key, reverse);
        entries
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size).sum()
    }

    /// See [`prune::plan`]
    pub fn plan_prune(&self, limit: u64, strategy: prune::Strategy) -> Vec<&CacheEntry> {
        prune::plan(&self.entries, limit, strategy)
    }
}

/// Stable sort of a listing by `key`, descending when `reverse` is set
pub fn sort_entries(entries: &mut [&CacheEntry], key: SortKey, reverse: bool) {
    entries.sort_by(|a, b| {
        let order = key.compare(a, b);
        if reverse { order.reverse() } else { order }
    });
}
