use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};

use tokio::fs;

/// Thin wrappers over the filesystem calls the page may request. Each
/// returns the underlying `io::Result`; the dispatcher decides how failure is
/// rendered on the wire.
#[derive(Debug, Clone, Default)]
pub(crate) struct FilesystemService;

impl FilesystemService {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    pub(crate) fn join(&self, dir_path: &str, file: &str) -> String {
        format!("{dir_path}{MAIN_SEPARATOR_STR}{file}")
    }

    pub(crate) async fn mkdir(&self, path: &Path, recursive: bool) -> io::Result<()> {
        if recursive {
            fs::create_dir_all(path).await
        } else {
            fs::create_dir(path).await
        }
    }

    pub(crate) async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    /// Creates an empty file, truncating any existing one.
    pub(crate) async fn create(&self, path: &Path) -> io::Result<()> {
        fs::File::create(path).await.map(|_| ())
    }

    pub(crate) async fn rename(&self, old_path: &Path, new_path: &Path) -> io::Result<()> {
        fs::rename(old_path, new_path).await
    }

    pub(crate) async fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }

    pub(crate) async fn read_text(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path).await
    }

    pub(crate) async fn write_text(&self, path: &Path, text: &str) -> io::Result<()> {
        fs::write(path, text.as_bytes()).await
    }

    /// Names of the entries directly inside `path`, sorted. Symlinks are
    /// listed as entries and never followed.
    pub(crate) async fn list_names(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut entries = fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
