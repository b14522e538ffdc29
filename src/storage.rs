//! Crash-safe snapshot persistence.
//!
//! Every write produces a new generation. The JSON-encoded [`Snapshot`] goes
//! into its own `segment.<generation>` file first; only then are the two
//! superblocks replaced to point at it, one after the other. Older segments
//! are removed once both superblocks have moved on. An interrupted write
//! therefore leaves at least one superblock naming a complete segment, and
//! a reader takes the newest generation that verifies.

use crate::tree::{Snapshot, SyncTree, TreeError};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SUPERBLOCKS: [&str; 2] = ["superblock_a", "superblock_b"];
const SEGMENT_PREFIX: &str = "segment.";
const TEMP_SUFFIX: &str = ".tmp";
const VERSION: u32 = 1;

/// Points at the segment of one generation and records what it must contain.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
struct Superblock {
    version: u32,
    generation: u64,
    node_count: u64,
    segment_checksum: u32,
    segment_len: u64,
}

#[derive(Debug)]
pub struct SnapshotStore {
    root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt storage: {0}")]
    Corrupt(&'static str),
    #[error("missing storage")]
    Missing,
    #[error("stored snapshot is not a valid tree: {0}")]
    Tree(#[from] TreeError),
}

impl SnapshotStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Persists `snapshot` as a new generation and returns its number.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<u64, StorageError> {
        let generation = self.latest_generation()?.map_or(1, |latest| latest + 1);
        let segment =
            serde_json::to_vec(snapshot).map_err(|_| StorageError::Corrupt("encode snapshot"))?;
        self.replace_file(&segment_name(generation), &segment)?;

        let superblock = Superblock {
            version: VERSION,
            generation,
            node_count: count_nodes(snapshot),
            segment_checksum: checksum_bytes(&segment),
            segment_len: segment.len() as u64,
        };
        let encoded = serde_json::to_vec(&superblock)
            .map_err(|_| StorageError::Corrupt("encode superblock"))?;
        for name in SUPERBLOCKS {
            self.replace_file(name, &encoded)?;
        }

        self.prune_segments(generation)?;
        debug!(generation, nodes = superblock.node_count, "snapshot committed");
        Ok(generation)
    }

    /// Reads the newest snapshot that passes verification.
    ///
    /// A superblock that cannot be decoded, or whose segment fails its
    /// length, checksum or node-count check, is skipped in favour of its
    /// twin. The last failure is returned when nothing verifies.
    pub fn read_snapshot(&self) -> Result<Snapshot, StorageError> {
        let mut failure = None;
        let mut candidates = Vec::with_capacity(SUPERBLOCKS.len());
        for name in SUPERBLOCKS {
            match self.read_superblock(name) {
                Ok(Some(superblock)) => candidates.push(superblock),
                Ok(None) => {}
                Err(err) => {
                    warn!(superblock = name, %err, "skipping unreadable superblock");
                    failure = Some(err);
                }
            }
        }
        candidates.sort_by(|a, b| b.generation.cmp(&a.generation));
        candidates.dedup();

        for superblock in &candidates {
            match self.read_segment(superblock) {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) => {
                    warn!(generation = superblock.generation, %err, "segment failed verification");
                    failure = Some(err);
                }
            }
        }
        Err(failure.unwrap_or(StorageError::Missing))
    }

    pub fn save_tree(&self, tree: &SyncTree) -> Result<u64, StorageError> {
        self.write_snapshot(&tree.to_snapshot()?)
    }

    pub fn load_tree(&self) -> Result<SyncTree, StorageError> {
        Ok(SyncTree::from_snapshot(&self.read_snapshot()?)?)
    }

    fn latest_generation(&self) -> Result<Option<u64>, StorageError> {
        let mut latest = None;
        for name in SUPERBLOCKS {
            match self.read_superblock(name) {
                Ok(Some(superblock)) => {
                    latest = latest.max(Some(superblock.generation));
                }
                Ok(None) | Err(StorageError::Corrupt(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(latest)
    }

    /// `Ok(None)` when the file does not exist.
    fn read_superblock(&self, name: &str) -> Result<Option<Superblock>, StorageError> {
        let bytes = match fs::read(self.root.join(name)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let superblock: Superblock = serde_json::from_slice(&bytes)
            .map_err(|_| StorageError::Corrupt("superblock decode"))?;
        if superblock.version != VERSION {
            return Err(StorageError::Corrupt("version"));
        }
        Ok(Some(superblock))
    }

    fn read_segment(&self, superblock: &Superblock) -> Result<Snapshot, StorageError> {
        let segment = match fs::read(self.root.join(segment_name(superblock.generation))) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::Corrupt("segment missing"));
            }
            Err(err) => return Err(err.into()),
        };
        if segment.len() as u64 != superblock.segment_len {
            return Err(StorageError::Corrupt("length mismatch"));
        }
        if checksum_bytes(&segment) != superblock.segment_checksum {
            return Err(StorageError::Corrupt("checksum mismatch"));
        }
        let snapshot: Snapshot = serde_json::from_slice(&segment)
            .map_err(|_| StorageError::Corrupt("snapshot decode"))?;
        if count_nodes(&snapshot) != superblock.node_count {
            return Err(StorageError::Corrupt("node count mismatch"));
        }
        Ok(snapshot)
    }

    /// Writes `bytes` beside `name`, flushes them to disk and renames the
    /// result over `name`.
    fn replace_file(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.root.join(name);
        let temp = self.root.join(format!("{name}{TEMP_SUFFIX}"));
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn prune_segments(&self, keep: u64) -> Result<(), StorageError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(generation) = name.to_str().and_then(parse_segment_name) else {
                continue;
            };
            if generation != keep {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

fn segment_name(generation: u64) -> String {
    format!("{SEGMENT_PREFIX}{generation}")
}

fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

fn count_nodes(snapshot: &Snapshot) -> u64 {
    1 + snapshot.children.iter().map(count_nodes).sum::<u64>()
}

fn checksum_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
