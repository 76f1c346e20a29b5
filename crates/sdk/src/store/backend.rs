use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;

use crate::error::Result;

/// Named blob persistence.
///
/// Absent blobs are `Ok(None)`; callers treat unreadable blobs as absent.
pub trait Backend: Send + Sync + 'static {
    fn get_item(&self, name: &str) -> Result<Option<String>>;

    fn set_item(&self, name: &str, value: &str) -> Result<()>;
}

/// In-process backend.
///
/// Clones share the same contents, so a clone handed to an engine can be
/// inspected, or handed to the next engine to emulate a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    items: Arc<DashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

impl Backend for MemoryBackend {
    fn get_item(&self, name: &str) -> Result<Option<String>> {
        Ok(self.items.get(name).map(|item| item.value().clone()))
    }

    fn set_item(&self, name: &str, value: &str) -> Result<()> {
        self.items.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Stores each blob as `<dir>/<name>.json`.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn path(&self, name: &str) -> PathBuf { self.dir.join(format!("{name}.json")) }
}

impl Backend for FileBackend {
    fn get_item(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(name)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, name: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Readers never observe a partially written blob.
        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.path(name))?;
        Ok(())
    }
}
