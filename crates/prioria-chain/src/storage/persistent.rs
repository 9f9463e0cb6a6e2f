use std::fs;
use std::path::{Path, PathBuf};

use super::Storage;
use crate::error::StorageError;

/// File-backed storage: one JSON file per snapshot inside a data directory.
///
/// Writes go to a temp file that is then renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl Storage for FileStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path)?))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(name);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioria_core::{Block, GenesisConfig};

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = Block::genesis(&GenesisConfig::default()).unwrap();

        {
            let storage = FileStorage::new(dir.path()).unwrap();
            storage.save_chain(&[genesis.clone()]).unwrap();
        }

        let storage = FileStorage::new(dir.path()).unwrap();
        assert_eq!(storage.load_chain().unwrap().unwrap(), vec![genesis]);
        assert!(storage.load_mempool().unwrap().is_none());
        assert!(!storage.path_for("chain").with_extension("json.tmp").exists());
    }

    #[test]
    fn test_overwrite_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested")).unwrap();

        storage.write("chain", b"[]").unwrap();
        storage.write("chain", b"[1]").unwrap();
        assert_eq!(storage.read("chain").unwrap().unwrap(), b"[1]".to_vec());
    }
}
