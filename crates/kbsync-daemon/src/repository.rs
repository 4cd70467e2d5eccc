//! Filesystem-backed content repository.
//!
//! Each tenant owns `{root}/{org_id}/{user_id}`. Root-relative paths are
//! always `/`-separated.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use kbsync_lifecycle::{ByteStream, Repository, SyncError};
use kbsync_types::{BusMessage, EventBus, FileMutationEvent, Identity, REPOSITORY_TOPIC};

pub struct FsRepository {
    root: PathBuf,
    bus: Arc<EventBus>,
}

impl FsRepository {
    pub fn new(root: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        Self {
            root: root.into(),
            bus,
        }
    }

    pub fn tenant_root(&self, identity: &Identity) -> PathBuf {
        self.root.join(&identity.org_id).join(&identity.user_id)
    }

    /// Resolve a root-relative path, rejecting anything escaping the tenant root.
    fn resolve(&self, identity: &Identity, relative: &str) -> Result<PathBuf, SyncError> {
        let relative_path = Path::new(relative);
        let escapes = relative_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(SyncError::Repository(format!(
                "invalid repository path '{}'",
                relative
            )));
        }
        Ok(self.tenant_root(identity).join(relative_path))
    }

    /// Whether `full_path` names a file inside some tenant's space.
    fn contains(&self, full_path: &Path) -> bool {
        match full_path.strip_prefix(&self.root) {
            // org, user and at least one name below them
            Ok(relative) => is_plain_relative(relative) && relative.components().count() > 2,
            Err(_) => false,
        }
    }

    fn notify(&self, event: FileMutationEvent) {
        self.bus
            .publish(REPOSITORY_TOPIC, BusMessage::FileMutation(event));
    }
}

fn is_plain_relative(relative: &Path) -> bool {
    relative.components().next().is_some()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn io_error(op: &str, path: &Path, e: std::io::Error) -> SyncError {
    SyncError::Repository(format!("{} {}: {}", op, path.display(), e))
}

#[async_trait]
impl Repository for FsRepository {
    fn full_path(&self, identity: &Identity, relative: &str) -> PathBuf {
        self.tenant_root(identity).join(relative)
    }

    fn root_relative_path(
        &self,
        identity: &Identity,
        full_path: &Path,
    ) -> Result<String, SyncError> {
        let relative = full_path
            .strip_prefix(self.tenant_root(identity))
            .ok()
            .filter(|relative| is_plain_relative(relative))
            .ok_or_else(|| {
                SyncError::Validation(format!(
                    "{} is outside the repository of {}",
                    full_path.display(),
                    identity
                ))
            })?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Ok(parts.join("/"))
    }

    async fn open_read(&self, full_path: &Path) -> Result<ByteStream, SyncError> {
        if !self.contains(full_path) {
            return Err(SyncError::Validation(format!(
                "{} is outside the repository",
                full_path.display()
            )));
        }
        let file = fs::File::open(full_path)
            .await
            .map_err(|e| io_error("open", full_path, e))?;
        Ok(Box::new(file))
    }

    async fn write_file(
        &self,
        identity: &Identity,
        relative: &str,
        mut contents: ByteStream,
        comment: &str,
        notify: bool,
    ) -> Result<(), SyncError> {
        let path = self.resolve(identity, relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create", parent, e))?;
        }
        let existed = fs::metadata(&path).await.is_ok();
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| io_error("create", &path, e))?;
        let bytes = tokio::io::copy(&mut contents, &mut file)
            .await
            .map_err(|e| io_error("write", &path, e))?;
        file.flush()
            .await
            .map_err(|e| io_error("write", &path, e))?;
        info!(path = relative, bytes, comment, "Stored repository file");

        if notify {
            let event = if existed {
                FileMutationEvent::modified(&path, identity)
            } else {
                FileMutationEvent::created(&path, identity)
            };
            self.notify(event);
        }
        Ok(())
    }

    async fn delete_file(
        &self,
        identity: &Identity,
        relative: &str,
        notify: bool,
    ) -> Result<(), SyncError> {
        let path = self.resolve(identity, relative)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| io_error("delete", &path, e))?;
        debug!(path = relative, "Deleted repository file");
        if notify {
            self.notify(FileMutationEvent::deleted(&path, identity));
        }
        Ok(())
    }

    async fn rename_file(
        &self,
        identity: &Identity,
        from_relative: &str,
        to_relative: &str,
        notify: bool,
    ) -> Result<(), SyncError> {
        let from = self.resolve(identity, from_relative)?;
        let to = self.resolve(identity, to_relative)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create", parent, e))?;
        }
        fs::rename(&from, &to)
            .await
            .map_err(|e| io_error("rename", &from, e))?;
        debug!(from = from_relative, to = to_relative, "Renamed repository file");
        if notify {
            self.notify(FileMutationEvent::renamed(&from, &to, identity));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_types::MutationKind;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn repository(dir: &TempDir) -> (FsRepository, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        (FsRepository::new(dir.path(), Arc::clone(&bus)), bus)
    }

    #[test]
    fn test_root_relative_path() {
        let dir = TempDir::new().unwrap();
        let (repo, _) = repository(&dir);
        let identity = Identity::new("u1", "o1");

        let full = repo.full_path(&identity, "reports/2024/q1.pdf");
        assert_eq!(full, dir.path().join("o1").join("u1").join("reports/2024/q1.pdf"));
        assert_eq!(
            repo.root_relative_path(&identity, &full).unwrap(),
            "reports/2024/q1.pdf"
        );

        let other = Identity::new("u2", "o1");
        assert!(repo.root_relative_path(&other, &full).is_err());
    }

    #[test]
    fn test_root_relative_path_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let (repo, _) = repository(&dir);
        let identity = Identity::new("u1", "o1");
        let tenant = repo.tenant_root(&identity);

        for path in [
            tenant.join("../u2/notes.txt"),
            tenant.clone(),
            PathBuf::from("/etc/secret.txt"),
        ] {
            assert!(
                matches!(
                    repo.root_relative_path(&identity, &path),
                    Err(SyncError::Validation(_))
                ),
                "{} should be rejected",
                path.display()
            );
        }
    }

    #[tokio::test]
    async fn test_open_read_rejects_paths_outside_repository() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let (repo, _) = repository(&dir);
        let identity = Identity::new("u1", "o1");

        let secret = outside.path().join("secret.txt");
        fs::write(&secret, "TOPSECRET").await.unwrap();
        let escaping = repo.tenant_root(&identity).join("../../../secret.txt");

        for path in [secret, escaping, dir.path().join("o1").join("u1")] {
            assert!(
                matches!(repo.open_read(&path).await, Err(SyncError::Validation(_))),
                "{} should be rejected",
                path.display()
            );
        }
    }

    #[tokio::test]
    async fn test_write_read_and_notify() {
        let dir = TempDir::new().unwrap();
        let (repo, bus) = repository(&dir);
        let mut rx = bus.subscribe(REPOSITORY_TOPIC);
        let identity = Identity::new("u1", "o1");

        repo.write_file(&identity, "notes/a.txt", Box::new(&b"hello"[..]), "test", true)
            .await
            .unwrap();
        repo.write_file(&identity, "notes/a.txt", Box::new(&b"again"[..]), "test", true)
            .await
            .unwrap();
        repo.write_file(&identity, "notes/b.txt", Box::new(&b"quiet"[..]), "test", false)
            .await
            .unwrap();

        let mut stream = repo
            .open_read(&repo.full_path(&identity, "notes/a.txt"))
            .await
            .unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "again");

        let kinds: Vec<MutationKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| match m {
                BusMessage::FileMutation(e) => e.kind,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec![MutationKind::Created, MutationKind::Modified]);
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let dir = TempDir::new().unwrap();
        let (repo, bus) = repository(&dir);
        let mut rx = bus.subscribe(REPOSITORY_TOPIC);
        let identity = Identity::new("u1", "o1");

        repo.write_file(&identity, "a.txt", Box::new(&b"x"[..]), "", false)
            .await
            .unwrap();
        repo.rename_file(&identity, "a.txt", "archive/a.txt", true)
            .await
            .unwrap();
        assert!(repo.full_path(&identity, "archive/a.txt").exists());
        match rx.try_recv().unwrap() {
            BusMessage::FileMutation(e) => {
                assert_eq!(e.kind, MutationKind::Renamed);
                assert_eq!(e.to_path, Some(repo.full_path(&identity, "archive/a.txt")));
            }
            other => panic!("unexpected {:?}", other),
        }

        repo.delete_file(&identity, "archive/a.txt", false)
            .await
            .unwrap();
        assert!(repo.delete_file(&identity, "archive/a.txt", false).await.is_err());
    }

    #[tokio::test]
    async fn test_escaping_paths_rejected() {
        let dir = TempDir::new().unwrap();
        let (repo, _) = repository(&dir);
        let identity = Identity::new("u1", "o1");
        let result = repo
            .write_file(&identity, "../o2/x.txt", Box::new(&b"x"[..]), "", false)
            .await;
        assert!(matches!(result, Err(SyncError::Repository(_))));
        assert!(repo.delete_file(&identity, "/etc/passwd", false).await.is_err());
    }
}
