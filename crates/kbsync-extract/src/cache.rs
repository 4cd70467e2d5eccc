//! Content-fingerprint keyed extraction cache.
//!
//! Layout under the cache root:
//! - `in/{fingerprint}_{name}`: staged copy of the source bytes
//! - `out/{fingerprint}_{name}.txt`: extracted text
//! - `tmp/`: worker configuration files
//!
//! Canonical slots are only ever created by renaming a fully written
//! working file into place, so a visible slot is always complete.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;
use ulid::Ulid;

use crate::error::ExtractError;

/// Identity of one version of a file: its path, size and modification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(path: &Path, size: u64, modified_ms: u128) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}_{}_{}", path.display(), size, modified_ms).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint of the file currently at `path`.
    pub async fn of_file(path: &Path) -> Result<Self, ExtractError> {
        let canonical = fs::canonicalize(path).await?;
        let metadata = fs::metadata(&canonical).await?;
        let modified_ms = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Ok(Self::compute(&canonical, metadata.len(), modified_ms))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Canonical input and output locations for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSlots {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Which slots are already populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
    pub input_ready: bool,
    pub output_ready: bool,
}

impl SlotState {
    pub fn is_hit(&self) -> bool {
        self.input_ready && self.output_ready
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionCache {
    input_dir: PathBuf,
    output_dir: PathBuf,
    temp_dir: PathBuf,
}

impl ExtractionCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            input_dir: root.join("in"),
            output_dir: root.join("out"),
            temp_dir: root.join("tmp"),
        }
    }

    /// Create the cache directories.
    pub async fn prepare(&self) -> Result<(), ExtractError> {
        for dir in [&self.input_dir, &self.output_dir, &self.temp_dir] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn slots(&self, fingerprint: &Fingerprint, file_name: &str) -> CacheSlots {
        CacheSlots {
            input: self
                .input_dir
                .join(format!("{}_{}", fingerprint.as_str(), file_name)),
            output: self
                .output_dir
                .join(format!("{}_{}.txt", fingerprint.as_str(), file_name)),
        }
    }

    pub async fn lookup(&self, slots: &CacheSlots) -> SlotState {
        SlotState {
            input_ready: is_readable_file(&slots.input).await,
            output_ready: is_readable_file(&slots.output).await,
        }
    }

    /// Unique working name next to `slot`, never equal to a canonical name.
    pub fn working_path(slot: &Path) -> PathBuf {
        let name = slot
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        slot.with_file_name(format!(".{}_{}.partial", Ulid::new(), name))
    }

    /// Copy `input` into the canonical input slot.
    pub async fn stage_input<R>(&self, input: &mut R, slots: &CacheSlots) -> Result<(), ExtractError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let working = Self::working_path(&slots.input);
        let result = async {
            let mut file = fs::File::create(&working).await?;
            let bytes = tokio::io::copy(input, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&working, &slots.input).await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;

        match result {
            Ok(bytes) => {
                debug!(slot = %slots.input.display(), bytes, "Staged extraction input");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&working).await;
                Err(e.into())
            }
        }
    }

    /// Move a completed working output into the canonical output slot.
    pub async fn publish_output(&self, working: &Path, slots: &CacheSlots) -> Result<(), ExtractError> {
        fs::rename(working, &slots.output).await?;
        debug!(slot = %slots.output.display(), "Published extraction output");
        Ok(())
    }
}

async fn is_readable_file(path: &Path) -> bool {
    match fs::File::open(path).await {
        Ok(file) => file.metadata().await.map(|m| m.is_file()).unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_changes_with_size_and_mtime() {
        let path = Path::new("/a/report.pdf");
        let base = Fingerprint::compute(path, 10, 1000);
        assert_eq!(base, Fingerprint::compute(path, 10, 1000));
        assert_ne!(base, Fingerprint::compute(path, 11, 1000));
        assert_ne!(base, Fingerprint::compute(path, 10, 1001));
        assert_ne!(base, Fingerprint::compute(Path::new("/b/report.pdf"), 10, 1000));
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn test_slot_names() {
        let cache = ExtractionCache::new("/cache");
        let fp = Fingerprint::compute(Path::new("/a/report.pdf"), 1, 1);
        let slots = cache.slots(&fp, "report.pdf");
        assert_eq!(
            slots.input,
            PathBuf::from(format!("/cache/in/{}_report.pdf", fp.as_str()))
        );
        assert_eq!(
            slots.output,
            PathBuf::from(format!("/cache/out/{}_report.pdf.txt", fp.as_str()))
        );
    }

    #[test]
    fn test_working_path_differs_from_slot() {
        let slot = Path::new("/cache/out/abc_report.pdf.txt");
        let working = ExtractionCache::working_path(slot);
        assert_ne!(working, slot);
        assert_eq!(working.parent(), slot.parent());
        assert!(working.to_string_lossy().ends_with(".partial"));
    }

    #[tokio::test]
    async fn test_stage_and_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path());
        cache.prepare().await.unwrap();

        let fp = Fingerprint::compute(Path::new("/a/report.pdf"), 5, 1);
        let slots = cache.slots(&fp, "report.pdf");
        assert_eq!(
            cache.lookup(&slots).await,
            SlotState {
                input_ready: false,
                output_ready: false
            }
        );

        let mut source: &[u8] = b"bytes";
        cache.stage_input(&mut source, &slots).await.unwrap();
        let state = cache.lookup(&slots).await;
        assert!(state.input_ready);
        assert!(!state.is_hit());
        assert_eq!(fs::read(&slots.input).await.unwrap(), b"bytes");

        let working = ExtractionCache::working_path(&slots.output);
        fs::write(&working, b"text").await.unwrap();
        cache.publish_output(&working, &slots).await.unwrap();
        assert!(cache.lookup(&slots).await.is_hit());
    }

    #[tokio::test]
    async fn test_fingerprint_of_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, b"one").await.unwrap();
        let first = Fingerprint::of_file(&path).await.unwrap();
        assert_eq!(first, Fingerprint::of_file(&path).await.unwrap());

        fs::write(&path, b"one two").await.unwrap();
        assert_ne!(first, Fingerprint::of_file(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_fingerprint_of_missing_file() {
        let result = Fingerprint::of_file(Path::new("/definitely/missing.pdf")).await;
        assert!(matches!(result, Err(ExtractError::Io(_))));
    }
}
