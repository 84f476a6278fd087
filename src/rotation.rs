//! Rotation history: which photos were shown, which are waiting, which is on screen.
//!
//! Every path the frame knows about lives in exactly one of three places:
//! the `shown` stack (tail = most recent), the `pending` FIFO, or `current`.
//! Forward steps move a photo from `pending` to `current` and push the old
//! `current` onto `shown`; backward steps undo that. `pending` is refilled
//! from a shuffled `shown` only once it is exhausted, which yields a full pass
//! over the library before any photo repeats.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::library::DiskPhoto;

/// Per-photo bookkeeping kept alongside the rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub added_at: NaiveDateTime,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub displayed_count: u64,
}

impl PhotoRecord {
    pub fn new(added_at: NaiveDateTime, size_bytes: u64) -> Self {
        Self {
            added_at,
            size_bytes,
            displayed_count: 0,
        }
    }
}

impl From<&DiskPhoto> for PhotoRecord {
    fn from(photo: &DiskPhoto) -> Self {
        Self::new(photo.modified, photo.size_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Summary of a reconcile pass, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Paths dropped from `shown`/`pending` because they left the disk.
    pub removed: usize,
    /// Paths newly appended to `pending`.
    pub added: usize,
    /// `pending` ran dry and was refilled from `shown`.
    pub cycle_reset: bool,
    /// The rotation was empty and got seeded from the directory.
    pub seeded: bool,
}

/// The persisted rotation aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationState {
    #[serde(default)]
    pub shown: Vec<PathBuf>,
    #[serde(default)]
    pub pending: VecDeque<PathBuf>,
    #[serde(default)]
    pub current: Option<PathBuf>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_change: Option<NaiveDateTime>,
    #[serde(
        default,
        rename = "photo_metadata",
        deserialize_with = "lenient_metadata"
    )]
    pub metadata: BTreeMap<PathBuf, PhotoRecord>,
}

impl RotationState {
    /// Number of distinct paths in `shown`, `pending` and `current`.
    pub fn tracked_len(&self) -> usize {
        self.shown.len() + self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.current.as_deref() == Some(path)
            || self.pending.iter().any(|p| p == path)
            || self.shown.iter().any(|p| p == path)
    }

    /// Verify that no path is duplicated or shared between the sequences.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen: HashSet<&Path> = HashSet::new();
        for path in self.shown.iter().chain(self.pending.iter()) {
            if !seen.insert(path.as_path()) {
                return Err(format!("{} is tracked more than once", path.display()));
            }
        }
        if let Some(current) = self.current.as_deref() {
            if seen.contains(current) {
                return Err(format!(
                    "current {} is also queued in shown/pending",
                    current.display()
                ));
            }
        }
        Ok(())
    }

    /// Drop duplicates left behind by older or hand-edited records.
    ///
    /// `current` wins over both sequences and `shown` wins over `pending`.
    pub fn repair(&mut self) -> usize {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        if let Some(current) = &self.current {
            seen.insert(current.clone());
        }
        let before = self.shown.len() + self.pending.len();
        self.shown.retain(|p| seen.insert(p.clone()));
        self.pending.retain(|p| seen.insert(p.clone()));
        let dropped = before - (self.shown.len() + self.pending.len());
        if dropped > 0 {
            warn!(dropped, "removed duplicate entries from rotation history");
        }
        dropped
    }

    /// Bring the rotation in line with the directory contents.
    ///
    /// Paths that left the disk are forgotten, unseen paths are queued, and an
    /// exhausted queue is refilled from a shuffled `shown`. `current` is never
    /// part of the refill pool.
    pub fn reconcile_with_disk<R>(&mut self, disk: &[DiskPhoto], rng: &mut R) -> ReconcileReport
    where
        R: Rng + ?Sized,
    {
        self.repair();
        let mut report = ReconcileReport::default();

        let on_disk: HashSet<&Path> = disk.iter().map(|p| p.path.as_path()).collect();
        let before = self.shown.len() + self.pending.len();
        self.shown.retain(|p| on_disk.contains(p.as_path()));
        self.pending.retain(|p| on_disk.contains(p.as_path()));
        report.removed = before - (self.shown.len() + self.pending.len());
        self.metadata.retain(|p, _| on_disk.contains(p.as_path()));
        self.backfill_metadata(disk);

        let fresh_start = self.shown.is_empty() && self.pending.is_empty();
        let mut fresh: Vec<PathBuf> = {
            let known: HashSet<&Path> = self
                .shown
                .iter()
                .chain(self.pending.iter())
                .map(PathBuf::as_path)
                .chain(self.current.as_deref())
                .collect();
            disk.iter()
                .filter(|p| !known.contains(p.path.as_path()))
                .map(|p| p.path.clone())
                .collect()
        };
        report.added = fresh.len();
        if fresh_start {
            fresh.shuffle(rng);
            if !fresh.is_empty() {
                report.seeded = true;
                info!(count = fresh.len(), "initial setup: photos available");
            }
        } else if !fresh.is_empty() {
            info!(count = fresh.len(), "added new photos to pending");
        }
        self.pending.extend(fresh);

        if self.pending.is_empty() && !self.shown.is_empty() {
            info!(count = self.shown.len(), "all photos shown, resetting cycle");
            let mut pool = std::mem::take(&mut self.shown);
            pool.shuffle(rng);
            self.pending = pool.into();
            report.cycle_reset = true;
        }

        if report.removed > 0 {
            debug!(removed = report.removed, "dropped photos missing from disk");
        }
        debug_assert!(self.check_invariants().is_ok());
        report
    }

    /// Queue `path` for the regular rotation unless it is already tracked.
    pub fn enqueue(&mut self, path: &Path, record: PhotoRecord) -> bool {
        if self.is_tracked(path) {
            return false;
        }
        self.pending.push_back(path.to_path_buf());
        self.metadata.entry(path.to_path_buf()).or_insert(record);
        true
    }

    /// Step through the rotation and return the new `current`, or `None` if
    /// there is nothing to step to. Nothing changes in that case.
    pub fn advance(&mut self, direction: Direction) -> Option<PathBuf> {
        let next = match direction {
            Direction::Forward => {
                let next = self.pending.pop_front()?;
                if let Some(old) = self.current.replace(next.clone()) {
                    self.shown.push(old);
                }
                next
            }
            Direction::Backward => {
                let prev = self.shown.pop()?;
                if let Some(old) = self.current.replace(prev.clone()) {
                    self.pending.push_front(old);
                }
                prev
            }
        };
        debug_assert!(self.check_invariants().is_ok());
        Some(next)
    }

    /// Put `path` on screen immediately, outside the rotation order.
    pub fn promote_immediate(&mut self, path: &Path, record: PhotoRecord) {
        self.metadata.entry(path.to_path_buf()).or_insert(record);
        if self.current.as_deref() == Some(path) {
            return;
        }
        self.pending.retain(|p| p != path);
        self.shown.retain(|p| p != path);
        if let Some(old) = self.current.replace(path.to_path_buf()) {
            self.shown.push(old);
        }
        debug_assert!(self.check_invariants().is_ok());
    }

    /// Delete the oldest photos once the library exceeds `max_count`.
    ///
    /// Metadata is synced with `disk` first, whether or not anything is due.
    /// Photos are ranked by `added_at`; `current` is skipped even when it is
    /// the oldest. A failed delete is logged and the batch continues. Returns
    /// the paths that were removed from the medium and from the rotation.
    pub fn evict_oldest<F>(
        &mut self,
        disk: &[DiskPhoto],
        max_count: usize,
        mut delete: F,
    ) -> Vec<PathBuf>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let on_disk: HashSet<&Path> = disk.iter().map(|p| p.path.as_path()).collect();
        self.metadata.retain(|p, _| on_disk.contains(p.as_path()));
        self.backfill_metadata(disk);
        if disk.len() <= max_count {
            return Vec::new();
        }

        let mut ranked: Vec<(NaiveDateTime, PathBuf)> = disk
            .iter()
            .map(|p| {
                let added_at = self
                    .metadata
                    .get(&p.path)
                    .map_or(p.modified, |m| m.added_at);
                (added_at, p.path.clone())
            })
            .collect();
        ranked.sort();

        let excess = disk.len() - max_count;
        info!(
            excess,
            keep = max_count,
            "storage cleanup: deleting oldest photos"
        );

        let mut evicted = Vec::new();
        for (added_at, path) in ranked.into_iter().take(excess) {
            if self.current.as_deref() == Some(path.as_path()) {
                debug!(path = %path.display(), "storage cleanup: keeping current photo");
                continue;
            }
            match delete(&path) {
                Ok(()) => {
                    info!(path = %path.display(), %added_at, "storage cleanup: deleted");
                    self.forget(&path);
                    evicted.push(path);
                }
                Err(err) => {
                    warn!(path = %path.display(), "storage cleanup: failed to delete: {err}");
                }
            }
        }
        evicted
    }

    /// Count a successful display of `path`.
    pub fn record_displayed(&mut self, path: &Path) {
        if let Some(record) = self.metadata.get_mut(path) {
            record.displayed_count += 1;
        }
    }

    fn forget(&mut self, path: &Path) {
        self.shown.retain(|p| p != path);
        self.pending.retain(|p| p != path);
        self.metadata.remove(path);
    }

    fn backfill_metadata(&mut self, disk: &[DiskPhoto]) {
        for photo in disk {
            self.metadata
                .entry(photo.path.clone())
                .or_insert_with(|| PhotoRecord::from(photo));
        }
    }
}

fn lenient_metadata<'de, D>(deserializer: D) -> Result<BTreeMap<PathBuf, PhotoRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Object(entries) = raw else {
        if !raw.is_null() {
            warn!("photo_metadata is not an object; rebuilding from disk");
        }
        return Ok(BTreeMap::new());
    };
    let mut out = BTreeMap::new();
    for (path, value) in entries {
        match serde_json::from_value::<PhotoRecord>(value) {
            Ok(record) => {
                out.insert(PathBuf::from(path), record);
            }
            Err(err) => warn!(%path, "dropping malformed photo metadata: {err}"),
        }
    }
    Ok(out)
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => match s.parse::<NaiveDateTime>() {
            Ok(ts) => Some(ts),
            Err(err) => {
                warn!(value = %s, "ignoring unparsable last_change: {err}");
                None
            }
        },
        Some(serde_json::Value::Null) | None => None,
        Some(other) => {
            warn!(value = %other, "ignoring non-string last_change");
            None
        }
    })
}
