//! Local file storage for uploaded documents.
//!
//! Files are stored under `{root}/{company_id}/{filename}`, with filenames
//! sanitized and collision-suffixed. The pipeline never touches storage
//! directly; the orchestrating layer saves bytes here and hands them to the
//! parser.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Save bytes, returning the storage path relative to the root.
    pub fn save(&self, content: &[u8], filename: &str, company_id: &str) -> Result<String> {
        let dir = self.root.join(company_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage dir: {}", dir.display()))?;

        let safe = sanitize_filename(filename);
        let mut candidate = safe.clone();
        let mut counter = 1;
        while dir.join(&candidate).exists() {
            candidate = match safe.rsplit_once('.') {
                Some((stem, ext)) => format!("{}_{}.{}", stem, counter, ext),
                None => format!("{}_{}", safe, counter),
            };
            counter += 1;
        }

        let path = dir.join(&candidate);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write file: {}", path.display()))?;

        Ok(format!("{}/{}", company_id, candidate))
    }

    pub fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(storage_path)?;
        std::fs::read(&path).with_context(|| format!("Failed to read file: {}", path.display()))
    }

    /// Delete a stored file. Returns false when the file was already gone.
    pub fn delete(&self, storage_path: &str) -> Result<bool> {
        let path = self.resolve(storage_path)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete file: {}", path.display()))?;
        Ok(true)
    }

    /// Resolve a relative storage path, rejecting traversal components.
    fn resolve(&self, storage_path: &str) -> Result<PathBuf> {
        let relative = Path::new(storage_path);
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            anyhow::bail!("invalid storage path: {}", storage_path);
        }
        Ok(self.root.join(relative))
    }
}

/// Strip directories and problematic characters; cap the length.
pub fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());

    let mut cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();

    if cleaned.len() > 200 {
        match cleaned.rsplit_once('.') {
            Some((stem, ext)) if ext.len() < 10 => {
                let keep = 200 - ext.len() - 1;
                let stem: String = stem.chars().take(keep).collect();
                cleaned = format!("{}.{}", stem, ext);
            }
            _ => cleaned = cleaned.chars().take(200).collect(),
        }
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_read_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let path = storage.save(b"body", "report.pdf", "co1").unwrap();
        assert_eq!(path, "co1/report.pdf");
        assert_eq!(storage.read(&path).unwrap(), b"body");
        assert!(storage.delete(&path).unwrap());
        assert!(!storage.delete(&path).unwrap());
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let first = storage.save(b"a", "deck.pptx", "co1").unwrap();
        let second = storage.save(b"b", "deck.pptx", "co1").unwrap();
        assert_eq!(first, "co1/deck.pptx");
        assert_eq!(second, "co1/deck_1.pptx");
        assert_eq!(storage.read(&second).unwrap(), b"b");
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a:b?c.pdf"), "a_b_c.pdf");
        let long = format!("{}.pdf", "x".repeat(300));
        assert!(sanitize_filename(&long).len() <= 200);
        assert!(sanitize_filename(&long).ends_with(".pdf"));
    }

    #[test]
    fn traversal_paths_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(storage.read("../outside").is_err());
        assert!(storage.read("co1/../../outside").is_err());
    }
}
