use crate::codec;
use crate::dlog;
use crate::envelope::TransferMetadata;
use crate::error::StagingError;
use crate::types::WorkoutPayload;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

pub const PAYLOAD_EXT: &str = "json";

const TMP_PREFIX: &str = ".staging-";
const TMP_SUFFIX: &str = ".tmp";

/// Layout of the staging root shared by both ends of a transfer.
///
/// - `outgoing/`: payloads written here wait for the transport to pick them up.
/// - `incoming/`: files the transport delivered; the inbox scans this.
#[derive(Debug, Clone)]
pub struct StagingDirs {
    root: PathBuf,
}

impl StagingDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn outgoing(&self) -> PathBuf {
        self.root.join("outgoing")
    }

    pub fn incoming(&self) -> PathBuf {
        self.root.join("incoming")
    }
}

/// A directory of staged payloads, one file per payload id.
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

impl StagingStore {
    /// Opens (creating if needed) the staging directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StagingError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the payload with `id` lives. Same id, same path.
    pub fn location_for(&self, id: Uuid) -> PathBuf {
        self.dir
            .join(id.hyphenated().to_string())
            .with_extension(PAYLOAD_EXT)
    }

    /// Encodes `payload` and publishes it at [`Self::location_for`].
    ///
    /// The bytes go to a hidden temp file in the same directory which is then
    /// renamed over the target, so readers see either the previous file or the
    /// new one in full. Writing the same id again replaces the file.
    pub fn write(&self, payload: &WorkoutPayload) -> Result<PathBuf, StagingError> {
        let bytes = codec::encode(payload)?;
        let location = self.location_for(payload.id);
        self.publish_bytes(&location, &bytes)?;

        tracing::info!(
            id = %payload.id,
            path = %location.display(),
            bytes = bytes.len(),
            "staged payload"
        );
        Ok(location)
    }

    fn publish_bytes(&self, location: &Path, bytes: &[u8]) -> Result<(), StagingError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .suffix(TMP_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| StagingError::io(&self.dir, e))?;
        tmp.write_all(bytes)
            .map_err(|e| StagingError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StagingError::io(tmp.path(), e))?;
        tmp.persist(location)
            .map_err(|e| StagingError::io(location, e.error))?;

        // Make the rename itself durable.
        #[cfg(unix)]
        {
            if let Ok(dir) = File::open(&self.dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    pub fn read(&self, location: &Path) -> Result<WorkoutPayload, StagingError> {
        read_payload(location)
    }

    pub fn read_id(&self, id: Uuid) -> Result<WorkoutPayload, StagingError> {
        read_payload(&self.location_for(id))
    }

    /// Staged payload files, sorted by file name.
    ///
    /// In-flight temp files and anything without a `.json` extension are left
    /// out. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<PathBuf>, StagingError> {
        if !self.dir.is_dir() {
            dlog!("staging dir missing path={}", self.dir.display());
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), err = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_payload_file(entry.path()) {
                out.push(entry.into_path());
            }
        }
        Ok(out)
    }

    /// Takes a file the transport delivered and stages it here.
    ///
    /// The file is decoded first. When an envelope came with it, the envelope
    /// must label the decoded payload or nothing is written. The delivered
    /// bytes are then published verbatim at [`Self::location_for`], so fields
    /// this build does not know about survive for a newer reader.
    pub fn accept(
        &self,
        delivered: &Path,
        envelope: Option<&TransferMetadata>,
    ) -> Result<(WorkoutPayload, PathBuf), StagingError> {
        let bytes = read_bytes(delivered)?;
        let payload = decode_at(delivered, &bytes)?;
        if let Some(meta) = envelope {
            meta.verify(&payload)?;
        }

        let location = self.location_for(payload.id);
        self.publish_bytes(&location, &bytes)?;
        tracing::info!(
            id = %payload.id,
            from = %delivered.display(),
            path = %location.display(),
            bytes = bytes.len(),
            "accepted delivery"
        );
        Ok((payload, location))
    }
}

/// Loads and decodes one payload file.
pub fn read_payload(path: &Path) -> Result<WorkoutPayload, StagingError> {
    let bytes = read_bytes(path)?;
    decode_at(path, &bytes)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, StagingError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StagingError::NotFound(path.to_path_buf()),
        _ => StagingError::io(path, e),
    })
}

fn decode_at(path: &Path, bytes: &[u8]) -> Result<WorkoutPayload, StagingError> {
    codec::decode(bytes).map_err(|source| StagingError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn is_payload_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.eq_ignore_ascii_case(PAYLOAD_EXT))
}
