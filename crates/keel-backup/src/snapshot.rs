//! Snapshot identity and metadata.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use keel_core::ResourceKind;
use serde::{Deserialize, Serialize};

const ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File holding the database dump inside a snapshot directory.
pub const DUMP_FILE: &str = "database.sql";

/// Metadata file, written after every other artifact.
pub const META_FILE: &str = "snapshot.json";

/// Timestamp-derived snapshot name, e.g. `20261017_143005` or `20261017_143005-2`.
///
/// The `-N` suffix disambiguates snapshots taken within the same second.
/// Ordering compares the timestamp, then the suffix numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(at.format(ID_FORMAT).to_string())
    }

    /// The same timestamp with a collision suffix.
    pub fn with_suffix(&self, n: u32) -> Self {
        let (base, _) = self.parts();
        Self(format!("{base}-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collision suffix, 0 when absent.
    pub fn suffix(&self) -> u32 {
        self.parts().1
    }

    fn parts(&self) -> (&str, u32) {
        match self.0.rsplit_once('-') {
            Some((base, suffix)) => match suffix.parse() {
                Ok(n) => (base, n),
                Err(_) => (&self.0, 0),
            },
            None => (&self.0, 0),
        }
    }
}

impl Ord for SnapshotId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts().cmp(&other.parts())
    }
}

impl PartialOrd for SnapshotId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for SnapshotId {
    type Err = String;

    /// Accepts only `YYYYMMDD_HHMMSS` with an optional `-N` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("snapshot id is empty".into());
        }
        let invalid = || format!("invalid snapshot id {s:?}, expected YYYYMMDD_HHMMSS[-N]");

        let (base, suffix) = match s.split_once('-') {
            Some((base, suffix)) => (base, Some(suffix)),
            None => (s, None),
        };
        let shaped = base.len() == 15
            && base
                .char_indices()
                .all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() });
        if !shaped || NaiveDateTime::parse_from_str(base, ID_FORMAT).is_err() {
            return Err(invalid());
        }
        if let Some(suffix) = suffix {
            if suffix.is_empty()
                || !suffix.bytes().all(|b| b.is_ascii_digit())
                || suffix.parse::<u32>().is_err()
            {
                return Err(invalid());
            }
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted description of a snapshot (`snapshot.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub namespace: String,
    /// Resource kinds captured, in capture order.
    pub kinds: Vec<ResourceKind>,
    pub has_database_dump: bool,
}

/// A snapshot directory on disk.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub dir: PathBuf,
    /// False when `snapshot.json` is missing, i.e. the capture never finished.
    pub complete: bool,
}

impl Snapshot {
    pub fn id(&self) -> &SnapshotId {
        &self.meta.id
    }

    pub fn manifest_path(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn dump_path(&self) -> PathBuf {
        self.dir.join(DUMP_FILE)
    }

    pub fn has_dump(&self) -> bool {
        self.dump_path().is_file()
    }

    /// Read-only view of the snapshot directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn id_from_time() {
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 14, 30, 5).unwrap();
        assert_eq!(SnapshotId::from_time(at).as_str(), "20261017_143005");
    }

    #[test]
    fn suffix_orders_numerically() {
        let base: SnapshotId = "20261017_143005".parse().unwrap();
        let two = base.with_suffix(2);
        let ten = base.with_suffix(10);
        assert_eq!(two.as_str(), "20261017_143005-2");
        assert!(base < two);
        assert!(two < ten);
        assert_eq!(ten.with_suffix(11).as_str(), "20261017_143005-11");
    }

    #[test]
    fn later_timestamp_beats_any_suffix() {
        let a: SnapshotId = "20261017_143005-9".parse().unwrap();
        let b: SnapshotId = "20261017_143006".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!("../etc".parse::<SnapshotId>().is_err());
        assert!("a/b".parse::<SnapshotId>().is_err());
        assert!("".parse::<SnapshotId>().is_err());
        assert!("latest".parse::<SnapshotId>().is_err());
    }

    #[test]
    fn only_timestamp_names_are_ids() {
        assert!("20261017_143005".parse::<SnapshotId>().is_ok());
        assert!("20261017_143005-12".parse::<SnapshotId>().is_ok());

        for name in [
            "lost+found",
            "archive-2026",
            "20261017",
            "20261017_1430",
            "20261017-143005",
            "20261317_143005",
            "20261017_143005-",
            "20261017_143005-x",
            "20261017_143005-+1",
            "2026101a_143005",
        ] {
            assert!(name.parse::<SnapshotId>().is_err(), "{name} accepted");
        }
    }

    #[test]
    fn meta_serializes_id_as_string() {
        let meta = SnapshotMeta {
            id: "20261017_143005".parse().unwrap(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 17, 14, 30, 5).unwrap(),
            namespace: "prod".into(),
            kinds: ResourceKind::CAPTURE_ORDER.to_vec(),
            has_database_dump: true,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["id"], "20261017_143005");
        assert_eq!(json["kinds"][2], "configmaps");
    }
}
