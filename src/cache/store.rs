//! Snapshot store persisting API responses to disk
//!
//! Every fetched payload is written to its own JSON file in an XDG-compliant
//! cache directory. Files are never overwritten: a refresh appends a new,
//! later-stamped snapshot and readers pick the newest one. Completed
//! team-of-the-week rounds get a single, timestamp-free file.
//!
//! File names:
//! - `{kind}_{id}_{createdAtEpochSeconds}.json` for regular snapshots
//! - `league_{league}_totw_{stage}_{round}.json` for completed rounds

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use tracing::{debug, info};

use super::error::{CacheError, Result};
use super::view::View;
use crate::clock::{Clock, SystemClock};
use crate::data::{EntityKey, EntityKind};

const SNAPSHOT_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";
const COMPLETE_ROUND_MARKER: &str = "_totw_";

/// One persisted, timestamped copy of an entity's data
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: EntityKey,
    pub payload: View,
    /// Set once when the snapshot is written
    pub created_at: DateTime<Utc>,
    /// Round number, for team-of-the-week snapshots
    pub round_index: Option<u32>,
    /// Historically final round data; never refreshed
    pub complete: bool,
}

impl Snapshot {
    /// Age of the snapshot relative to `now`, never negative
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).max(Duration::zero())
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    created_at: DateTime<Utc>,
    path: PathBuf,
    complete: bool,
}

/// Per-key list of snapshot files, oldest first
type Index = BTreeMap<EntityKey, Vec<IndexEntry>>;

/// Size of the stored snapshots for one entity kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Disk usage of the whole store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub by_kind: BTreeMap<EntityKind, KindUsage>,
}

impl StoreStats {
    pub fn total_files(&self) -> usize {
        self.by_kind.values().map(|usage| usage.files).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.by_kind.values().map(|usage| usage.bytes).sum()
    }

    /// Total size in megabytes, rounded to three decimals
    pub fn total_megabytes(&self) -> f64 {
        let mb = self.total_bytes() as f64 / (1024.0 * 1024.0);
        (mb * 1000.0).round() / 1000.0
    }
}

/// Append-only, directory-backed snapshot storage
///
/// The directory is scanned once when the store is opened; afterwards an
/// in-memory index maps each key to its snapshot files so lookups never
/// glob the filesystem. Writes go to a temporary file that is renamed into
/// place, so a reader never observes a half-written snapshot.
pub struct SnapshotStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    index: Mutex<Index>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Returns the XDG-compliant default directory (`~/.cache/fotcache/` on Linux)
    ///
    /// Returns `None` if no home directory can be determined.
    pub fn default_dir() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "fotcache")?;
        Some(project_dirs.cache_dir().to_path_buf())
    }

    /// Opens the store in the default directory using wall-clock time
    pub fn open_default() -> Result<Self> {
        let dir = Self::default_dir()
            .ok_or_else(|| CacheError::Config("cannot determine a cache directory".to_string()))?;
        Self::open(dir, Arc::new(SystemClock))
    }

    /// Opens a store rooted at `dir`, indexing any snapshots already there
    ///
    /// A missing directory is fine; it is created on the first write.
    pub fn open(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = dir.into();
        let index = scan_dir(&dir)?;
        debug!(
            dir = %dir.display(),
            keys = index.len(),
            "indexed snapshot directory"
        );
        Ok(Self {
            dir,
            clock,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists a new snapshot stamped with the current time
    ///
    /// Never replaces an existing snapshot. If the clock has not moved past
    /// the key's newest snapshot (second precision), the new one is stamped
    /// one second after it so `created_at` stays strictly increasing.
    pub fn put(&self, key: &EntityKey, payload: &View) -> Result<Snapshot> {
        validate_key(key)?;
        let mut index = self.lock_index();

        let now = truncate_to_seconds(self.clock.now());
        let newest = index
            .get(key)
            .and_then(|entries| entries.iter().filter(|e| !e.complete).map(|e| e.created_at).max());
        let created_at = match newest {
            Some(newest) if newest >= now => newest + Duration::seconds(1),
            _ => now,
        };

        let path = self.dir.join(format!(
            "{}_{}_{}.{SNAPSHOT_EXTENSION}",
            key.kind(),
            key.id(),
            created_at.timestamp()
        ));
        self.write_atomically(&path, payload)?;
        info!(%key, path = %path.display(), "stored snapshot");

        index.entry(key.clone()).or_default().push(IndexEntry {
            created_at,
            path,
            complete: false,
        });

        Ok(Snapshot {
            key: key.clone(),
            payload: payload.clone(),
            created_at,
            round_index: key.round_parts().map(|(_, _, round)| round),
            complete: false,
        })
    }

    /// Persists the terminal snapshot of a completed round
    ///
    /// A round has at most one complete snapshot; if it already exists it is
    /// returned unchanged and nothing is written.
    pub fn put_complete_round(&self, key: &EntityKey, payload: &View) -> Result<Snapshot> {
        validate_key(key)?;
        let (league, stage, round) = key.round_parts().ok_or_else(|| {
            CacheError::InvalidKey(format!("{key} is not a team-of-the-week round key"))
        })?;

        let mut index = self.lock_index();
        if let Some(existing) = index
            .get(key)
            .and_then(|entries| entries.iter().find(|e| e.complete))
        {
            return read_snapshot(key, existing);
        }

        let path = self.dir.join(format!(
            "{}_{league}{COMPLETE_ROUND_MARKER}{stage}_{round}.{SNAPSHOT_EXTENSION}",
            EntityKind::League,
        ));
        self.write_atomically(&path, payload)?;
        let created_at = truncate_to_seconds(self.clock.now());
        info!(%key, path = %path.display(), "stored completed round");

        index.entry(key.clone()).or_default().push(IndexEntry {
            created_at,
            path,
            complete: true,
        });

        Ok(Snapshot {
            key: key.clone(),
            payload: payload.clone(),
            created_at,
            round_index: Some(round),
            complete: true,
        })
    }

    /// Returns the snapshot to use for `key`, or `None` if nothing is stored
    ///
    /// A completed round snapshot always wins; otherwise the newest one does.
    pub fn latest(&self, key: &EntityKey) -> Result<Option<Snapshot>> {
        let index = self.lock_index();
        let Some(entries) = index.get(key) else {
            return Ok(None);
        };
        let chosen = entries
            .iter()
            .find(|e| e.complete)
            .or_else(|| entries.iter().max_by_key(|e| e.created_at));
        chosen.map(|entry| read_snapshot(key, entry)).transpose()
    }

    /// Returns the terminal snapshot of a completed round, if one is stored
    ///
    /// Only that one file is read; other snapshots of the key are untouched.
    pub fn latest_complete(&self, key: &EntityKey) -> Result<Option<Snapshot>> {
        let index = self.lock_index();
        index
            .get(key)
            .and_then(|entries| entries.iter().find(|e| e.complete))
            .map(|entry| read_snapshot(key, entry))
            .transpose()
    }

    /// Returns every snapshot whose kind and id start with the given prefixes
    ///
    /// Results are ordered by key, then oldest first.
    pub fn list_by_prefix(&self, kind_prefix: &str, id_prefix: &str) -> Result<Vec<Snapshot>> {
        let index = self.lock_index();
        let mut snapshots = Vec::new();
        for (key, entries) in index.iter() {
            if !key.kind().as_str().starts_with(kind_prefix) || !key.id().starts_with(id_prefix) {
                continue;
            }
            let mut entries = entries.clone();
            entries.sort_by_key(|e| e.created_at);
            for entry in &entries {
                snapshots.push(read_snapshot(key, entry)?);
            }
        }
        Ok(snapshots)
    }

    /// Deletes every snapshot stored for `key`, returning how many were removed
    pub fn clear(&self, key: &EntityKey) -> Result<usize> {
        let mut index = self.lock_index();
        let Some(entries) = index.remove(key) else {
            return Ok(0);
        };

        let mut removed = 0;
        for (position, entry) in entries.iter().enumerate() {
            match fs::remove_file(&entry.path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    // Keep the files we could not delete visible to readers
                    index.insert(key.clone(), entries[position..].to_vec());
                    return Err(CacheError::storage("delete", &entry.path, e));
                }
            }
        }
        info!(%key, removed, "cleared snapshots");
        Ok(removed)
    }

    /// Number of files and bytes stored per entity kind
    pub fn stats(&self) -> Result<StoreStats> {
        let index = self.lock_index();
        let mut stats = StoreStats::default();
        for (key, entries) in index.iter() {
            for entry in entries {
                let metadata = fs::metadata(&entry.path)
                    .map_err(|e| CacheError::storage("inspect", &entry.path, e))?;
                let usage = stats.by_kind.entry(key.kind()).or_default();
                usage.files += 1;
                usage.bytes += metadata.len();
            }
        }
        Ok(stats)
    }

    fn write_atomically(&self, path: &Path, payload: &View) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::storage("create", &self.dir, e))?;

        let json = serde_json::to_vec_pretty(payload)
            .map_err(|e| CacheError::UnsupportedType(e.to_string()))?;
        let temp_path = path.with_extension(TEMP_EXTENSION);
        fs::write(&temp_path, json).map_err(|e| CacheError::storage("write", &temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            CacheError::storage("rename", path, e)
        })
    }

    fn lock_index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Rejects ids that cannot be embedded in a file name
fn validate_key(key: &EntityKey) -> Result<()> {
    let id = key.id();
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(format!(
            "'{id}' may only contain letters, digits, '-' and '.'"
        )))
    }
}

fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}

fn read_snapshot(key: &EntityKey, entry: &IndexEntry) -> Result<Snapshot> {
    let content =
        fs::read_to_string(&entry.path).map_err(|e| CacheError::storage("read", &entry.path, e))?;
    let payload: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| CacheError::CorruptSnapshot {
            path: entry.path.clone(),
            source,
        })?;

    Ok(Snapshot {
        key: key.clone(),
        payload: View::from(payload),
        created_at: entry.created_at,
        round_index: key.round_parts().map(|(_, _, round)| round),
        complete: entry.complete,
    })
}

fn scan_dir(dir: &Path) -> Result<Index> {
    let mut index = Index::new();
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(index),
        Err(e) => return Err(CacheError::storage("list", dir, e)),
    };

    for dir_entry in read_dir {
        let dir_entry = dir_entry.map_err(|e| CacheError::storage("list", dir, e))?;
        let path = dir_entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };

        let parsed = match parse_complete_round_name(stem) {
            Some(key) => {
                let modified = dir_entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map_err(|e| CacheError::storage("inspect", &path, e))?;
                Some((key, DateTime::<Utc>::from(modified), true))
            }
            None => parse_snapshot_name(stem).map(|(key, created_at)| (key, created_at, false)),
        };

        match parsed {
            Some((key, created_at, complete)) => {
                index.entry(key).or_default().push(IndexEntry {
                    created_at: truncate_to_seconds(created_at),
                    path,
                    complete,
                });
            }
            None => debug!(file = name, "ignoring unrecognized file in snapshot directory"),
        }
    }

    for entries in index.values_mut() {
        entries.sort_by_key(|e| e.created_at);
    }
    Ok(index)
}

/// Parses `{kind}_{id}_{epochSeconds}`
fn parse_snapshot_name(stem: &str) -> Option<(EntityKey, DateTime<Utc>)> {
    let (kind, rest) = stem.split_once('_')?;
    let (id, timestamp) = rest.rsplit_once('_')?;
    let kind: EntityKind = kind.parse().ok()?;
    let created_at = DateTime::from_timestamp(timestamp.parse().ok()?, 0)?;
    if id.is_empty() {
        return None;
    }
    Some((EntityKey::new(kind, id), created_at))
}

/// Parses `league_{league}_totw_{stage}_{round}`
fn parse_complete_round_name(stem: &str) -> Option<EntityKey> {
    let rest = stem.strip_prefix("league_")?;
    let (league, round_part) = rest.split_once(COMPLETE_ROUND_MARKER)?;
    let (stage, round) = round_part.rsplit_once('_')?;
    if league.is_empty() || stage.is_empty() {
        return None;
    }
    Some(EntityKey::totw_round(league, stage, round.parse().ok()?))
}
