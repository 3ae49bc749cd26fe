use super::{RemoteBackup, RemoteProvider};
use anyhow::{bail, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const CREATED_MARKER: &str = ".created";

/// Mirrors backups into another directory, one subdirectory per backup.
pub struct LocalDirectoryProvider {
    root: PathBuf,
}

impl LocalDirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn backup_dir(&self, id: &str) -> anyhow::Result<PathBuf> {
        let mut parts = Path::new(id).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(id)),
            _ => bail!("invalid backup id '{id}'"),
        }
    }

    fn created_at(dir: &Path) -> DateTime<Utc> {
        fs::read_to_string(dir.join(CREATED_MARKER))
            .ok()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| {
                fs::metadata(dir)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from)
            })
            .unwrap_or_default()
    }
}

impl RemoteProvider for LocalDirectoryProvider {
    fn upload_backup(&self, path: &Path, name: &str) -> anyhow::Result<()> {
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid upload name '{name}'");
        }
        let Some(Component::Normal(id)) = relative.components().next() else {
            bail!("invalid upload name '{name}'");
        };

        let group = self.root.join(id);
        if !group.join(CREATED_MARKER).exists() {
            fs::create_dir_all(&group)?;
            fs::write(
                group.join(CREATED_MARKER),
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            )?;
        }

        let dest = self.root.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(path, &dest).with_context(|| format!("copying to {}", dest.display()))?;
        Ok(())
    }

    fn list_backups(&self, limit: usize) -> anyhow::Result<Vec<RemoteBackup>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let size_bytes = WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && e.file_name() != CREATED_MARKER)
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum();
            backups.push(RemoteBackup {
                id: entry.file_name().to_string_lossy().into_owned(),
                created_at: Self::created_at(&dir),
                size_bytes,
            });
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        backups.truncate(limit);
        Ok(backups)
    }

    fn delete_backup(&self, id: &str) -> anyhow::Result<()> {
        let dir = self.backup_dir(id)?;
        fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_escaping_names() {
        let remote = TempDir::new().unwrap();
        let provider = LocalDirectoryProvider::new(remote.path());
        let file = remote.path().join("f");
        fs::write(&file, b"x").unwrap();

        assert!(provider.upload_backup(&file, "../evil").is_err());
        assert!(provider.upload_backup(&file, "/abs/path").is_err());
        assert!(provider.delete_backup("..").is_err());
        assert!(provider.delete_backup("a/b").is_err());
    }

    #[test]
    fn test_list_reports_sizes() {
        let remote = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let file = source.path().join("data.sql");
        fs::write(&file, b"12345").unwrap();

        let provider = LocalDirectoryProvider::new(remote.path().join("mirror"));
        assert!(provider.list_backups(10).unwrap().is_empty());

        provider.upload_backup(&file, "b1/database/data.sql").unwrap();
        provider.upload_backup(&file, "b1/other.sql").unwrap();

        let listed = provider.list_backups(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "b1");
        assert_eq!(listed[0].size_bytes, 10);
    }
}
