//! Small-file storage under the data directory.
//!
//! Writes go through a temp file and a rename so readers never observe a
//! half-written config or queue dump.

use std::path::PathBuf;

#[derive(Clone)]
pub struct DataDir {
    base: PathBuf,
}

impl DataDir {
    pub fn new(base: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(DataDir { base })
    }

    pub fn exists(&self, name: &str) -> bool {
        std::fs::metadata(self.base.join(name)).is_ok()
    }

    pub fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.base.join(name))
    }

    pub fn write(&self, name: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.base.join(name);
        let temp_path = self
            .base
            .join(format!("{}-{name}", rusty_ulid::generate_ulid_string()));

        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataDir::new(dir.path()).unwrap();

        assert!(!store.exists("notes.txt"));
        store.write("notes.txt", b"hello").unwrap();
        assert!(store.exists("notes.txt"));
        assert_eq!(store.read("notes.txt").unwrap(), b"hello");
    }

    #[test]
    fn write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataDir::new(dir.path()).unwrap();

        store.write("notes.txt", b"one").unwrap();
        store.write("notes.txt", b"two").unwrap();
        assert_eq!(store.read("notes.txt").unwrap(), b"two");
    }
}
