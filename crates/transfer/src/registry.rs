//! Files reconstructed on the receiving side, in arrival order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use roomdrop_protocol::FileMeta;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::TransferError;
use crate::progress::format_bytes;
use crate::validation::validate_file_name;

/// Give up on numbered suffixes after this many collisions.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// One fully received file. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    name: String,
    size: u64,
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl CompletedFile {
    pub fn new(meta: FileMeta, bytes: Vec<u8>) -> Self {
        Self {
            name: meta.name,
            size: bytes.len() as u64,
            mime_type: meta.mime_type,
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `name (1.5 KB)`, as listed to the user.
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.name, format_bytes(self.size))
    }
}

/// Append-only list of completed files.
///
/// Cloning is cheap: file contents are shared, not copied.
#[derive(Debug, Clone, Default)]
pub struct CompletedFileRegistry {
    files: Vec<CompletedFile>,
}

impl CompletedFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a file and returns its index.
    pub fn push(&mut self, file: CompletedFile) -> usize {
        self.files.push(file);
        self.files.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&CompletedFile> {
        self.files.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompletedFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes file `index` into `dir` and returns the path written.
    ///
    /// An existing file is never overwritten; `name (1).ext`, `name (2).ext`
    /// and so on are tried instead.
    pub async fn save(&self, index: usize, dir: &Path) -> Result<PathBuf, TransferError> {
        let file = self.get(index).ok_or(TransferError::NoSuchFile(index))?;
        save_file(file, dir).await
    }

    /// Writes every file into `dir`, in list order.
    pub async fn save_all(&self, dir: &Path) -> Result<Vec<PathBuf>, TransferError> {
        let mut paths = Vec::with_capacity(self.files.len());
        for file in &self.files {
            paths.push(save_file(file, dir).await?);
        }
        Ok(paths)
    }
}

/// Writes one completed file into `dir` under a free name.
async fn save_file(file: &CompletedFile, dir: &Path) -> Result<PathBuf, TransferError> {
    validate_file_name(&file.name)?;
    tokio::fs::create_dir_all(dir).await?;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(numbered_name(&file.name, attempt));
        let mut out = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };
        out.write_all(file.bytes()).await?;
        out.flush().await?;
        info!(path = %path.display(), size = file.size, "saved file");
        return Ok(path);
    }

    Err(TransferError::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {}", file.name),
    )))
}

/// `report.pdf` -> `report (2).pdf`; attempt 0 keeps the name.
fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    // A leading dot is part of the stem (`.bashrc` -> `.bashrc (1)`).
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({attempt}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({attempt})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, bytes: &[u8]) -> CompletedFile {
        CompletedFile::new(
            FileMeta::new(name, bytes.len() as u64, "text/plain"),
            bytes.to_vec(),
        )
    }

    #[test]
    fn insertion_order_is_list_order() {
        let mut registry = CompletedFileRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.push(file("a.txt", b"a")), 0);
        assert_eq!(registry.push(file("b.txt", b"bb")), 1);

        let names: Vec<_> = registry.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(registry.get(1).map(|f| f.size()), Some(2));
        assert!(registry.get(2).is_none());
    }

    #[tokio::test]
    async fn clone_saves_independently_of_later_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = CompletedFileRegistry::new();
        registry.push(file("a.txt", b"first"));

        let snapshot = registry.clone();
        registry.push(file("b.txt", b"second"));
        assert!(Arc::ptr_eq(
            &snapshot.get(0).unwrap().bytes,
            &registry.get(0).unwrap().bytes
        ));

        let paths = snapshot.save_all(dir.path()).await.unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"first");
    }

    #[test]
    fn numbered_names() {
        assert_eq!(numbered_name("report.pdf", 0), "report.pdf");
        assert_eq!(numbered_name("report.pdf", 2), "report (2).pdf");
        assert_eq!(numbered_name("a.tar.gz", 1), "a.tar (1).gz");
        assert_eq!(numbered_name("README", 1), "README (1)");
        assert_eq!(numbered_name(".bashrc", 1), ".bashrc (1)");
    }

    #[test]
    fn display_label_uses_human_size() {
        assert_eq!(file("x.bin", &[0u8; 1536]).display_label(), "x.bin (1.5 KB)");
    }

    #[tokio::test]
    async fn save_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = CompletedFileRegistry::new();
        registry.push(file("note.txt", b"first"));
        registry.push(file("note.txt", b"second"));

        let paths = registry.save_all(dir.path()).await.unwrap();
        assert_eq!(paths[0], dir.path().join("note.txt"));
        assert_eq!(paths[1], dir.path().join("note (1).txt"));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"first");
        assert_eq!(std::fs::read(&paths[1]).unwrap(), b"second");

        let again = registry.save(0, dir.path()).await.unwrap();
        assert_eq!(again, dir.path().join("note (2).txt"));
    }

    #[tokio::test]
    async fn save_rejects_hostile_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = CompletedFileRegistry::new();
        registry.push(file("../escape.txt", b"x"));

        assert!(matches!(
            registry.save(0, dir.path()).await,
            Err(TransferError::InvalidName(_))
        ));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn save_unknown_index() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompletedFileRegistry::new();
        assert!(matches!(
            registry.save(3, dir.path()).await,
            Err(TransferError::NoSuchFile(3))
        ));
    }

    #[tokio::test]
    async fn save_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = CompletedFileRegistry::new();
        registry.push(file("empty.bin", b""));
        let path = registry.save(0, dir.path()).await.unwrap();
        assert_eq!(std::fs::metadata(path).unwrap().len(), 0);
    }
}
