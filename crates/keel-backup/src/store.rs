//! BackupStore — the on-disk layout of snapshots and the latest pointer.
//!
//! ```text
//! <root>/
//!   latest                  id of the newest fully written snapshot
//!   20261017_143005/
//!     deployments.yaml
//!     services.yaml
//!     configmaps.yaml
//!     secrets.yaml
//!     database.sql          optional
//!     snapshot.json         written last
//! ```

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::snapshot::{META_FILE, Snapshot, SnapshotId, SnapshotMeta};

/// Name of the pointer file inside the backup root.
pub const LATEST_FILE: &str = "latest";

/// Maximum same-second collisions tolerated before giving up.
const MAX_SUFFIX: u32 = 1000;

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// Open (or create) a backup root.
    pub fn open(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        debug!(?root, "backup store opened");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Open a backup root that must already exist.
    pub fn open_existing(root: &Path) -> io::Result<Self> {
        if !root.is_dir() {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_dir(&self, id: &SnapshotId) -> PathBuf {
        self.root.join(id.as_str())
    }

    // ── Latest pointer ─────────────────────────────────────────────

    /// Read the latest pointer. `None` when no snapshot was ever completed.
    pub fn latest(&self) -> io::Result<Option<SnapshotId>> {
        match fs::read_to_string(self.root.join(LATEST_FILE)) {
            Ok(content) => content
                .parse()
                .map(Some)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Point `latest` at `id`. The rename makes the switch atomic.
    pub fn set_latest(&self, id: &SnapshotId) -> io::Result<()> {
        let tmp = self.root.join(format!(".{LATEST_FILE}.tmp"));
        fs::write(&tmp, id.as_str())?;
        fs::rename(&tmp, self.root.join(LATEST_FILE))?;
        debug!(%id, "latest pointer updated");
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Create a fresh, empty snapshot directory named after `now`.
    ///
    /// The id is bumped with a suffix until it names no existing directory
    /// and sorts after the current latest pointer.
    pub fn allocate(&self, now: DateTime<Utc>) -> io::Result<(SnapshotId, PathBuf)> {
        let fresh = SnapshotId::from_time(now);
        let (start, mut n) = match self.latest()? {
            Some(latest) if fresh <= latest => {
                let next = latest.suffix() + 1;
                (latest, next)
            }
            _ => (fresh, 0),
        };

        for _ in 0..MAX_SUFFIX {
            let candidate = if n == 0 {
                start.clone()
            } else {
                start.with_suffix(n)
            };
            let dir = self.snapshot_dir(&candidate);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((candidate, dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free snapshot id after {start}"),
        ))
    }

    pub fn write_meta(&self, meta: &SnapshotMeta) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(meta).map_err(io::Error::other)?;
        fs::write(self.snapshot_dir(&meta.id).join(META_FILE), json)
    }

    /// Load a snapshot. `None` if its directory does not exist.
    ///
    /// Directories without readable metadata are reported as incomplete,
    /// dated by their modification time.
    pub fn load(&self, id: &SnapshotId) -> io::Result<Option<Snapshot>> {
        let dir = self.snapshot_dir(id);
        if !dir.is_dir() {
            return Ok(None);
        }

        let meta = fs::read(dir.join(META_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<SnapshotMeta>(&bytes).ok());

        let snapshot = match meta {
            Some(meta) => Snapshot {
                meta,
                dir,
                complete: true,
            },
            None => {
                let modified = fs::metadata(&dir)?.modified()?;
                let meta = SnapshotMeta {
                    id: id.clone(),
                    created_at: DateTime::<Utc>::from(modified),
                    namespace: String::new(),
                    kinds: Vec::new(),
                    has_database_dump: false,
                };
                Snapshot {
                    meta,
                    dir,
                    complete: false,
                }
            }
        };
        Ok(Some(snapshot))
    }

    /// Every snapshot directory under the root, oldest first.
    pub fn list(&self) -> io::Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(id) = name.parse::<SnapshotId>() else {
                continue;
            };
            if let Some(snapshot) = self.load(&id)? {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(snapshots)
    }

    pub fn remove(&self, id: &SnapshotId) -> io::Result<()> {
        fs::remove_dir_all(self.snapshot_dir(id))
    }
}
