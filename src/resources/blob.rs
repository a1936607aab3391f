//! # Blob Storage
//!
//! Non-XML resources (binaries and stored values) are addressed by the same
//! hierarchical paths as documents but live outside the node store. The
//! update engine only needs path-addressed write/read/delete/rename, which
//! the [`BlobStore`] trait captures.
//!
//! ## Implementations
//!
//! - [`MemBlobs`]: hash map, for in-memory databases and tests
//! - [`DirBlobs`]: one file per resource below `<dir>/raw` (binaries) and
//!   `<dir>/values` (stored values)
//!
//! ```text
//! database_dir/
//! ├── raw/
//! │   └── img/logo.png
//! └── values/
//!     └── settings
//! ```
//!
//! ## Durability
//!
//! `DirBlobs` writes files directly and remembers them; `sync()` fsyncs every
//! file written since the previous sync. There is no retry: an I/O failure is
//! returned as `UpdateError::Io` and aborts the snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::Result;
use hashbrown::HashMap;
use tracing::{debug, trace};

use super::path::{is_within, rebase};
use crate::config::{RAW_DIR, VALUES_DIR};
use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Binary,
    Value,
}

impl ResourceType {
    pub const ALL: [ResourceType; 2] = [ResourceType::Binary, ResourceType::Value];

    pub fn dir_name(self) -> &'static str {
        match self {
            ResourceType::Binary => RAW_DIR,
            ResourceType::Value => VALUES_DIR,
        }
    }
}

/// Path-addressed storage for non-XML resources. Paths are normalized.
pub trait BlobStore: Send {
    fn write(&mut self, rtype: ResourceType, path: &str, data: &[u8]) -> Result<()>;

    fn read(&self, rtype: ResourceType, path: &str) -> Result<Option<Vec<u8>>>;

    /// Removes every resource at or below `path`; returns how many were removed.
    fn delete(&mut self, path: &str) -> Result<usize>;

    /// Moves every resource at or below `source` to `target`; returns how many moved.
    fn rename(&mut self, source: &str, target: &str) -> Result<usize>;

    fn paths(&self, rtype: ResourceType) -> Result<Vec<String>>;

    fn sync(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemBlobs {
    entries: HashMap<(ResourceType, String), Vec<u8>>,
}

impl MemBlobs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemBlobs {
    fn write(&mut self, rtype: ResourceType, path: &str, data: &[u8]) -> Result<()> {
        self.entries.insert((rtype, path.to_string()), data.to_vec());
        Ok(())
    }

    fn read(&self, rtype: ResourceType, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(&(rtype, path.to_string())).cloned())
    }

    fn delete(&mut self, path: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|(_, p), _| !is_within(p, path));
        Ok(before - self.entries.len())
    }

    fn rename(&mut self, source: &str, target: &str) -> Result<usize> {
        let moved: Vec<_> = self
            .entries
            .keys()
            .filter(|(_, p)| is_within(p, source))
            .cloned()
            .collect();
        for key in &moved {
            if let Some(data) = self.entries.remove(key) {
                let (rtype, path) = key;
                self.entries.insert((*rtype, rebase(path, source, target)), data);
            }
        }
        Ok(moved.len())
    }

    fn paths(&self, rtype: ResourceType) -> Result<Vec<String>> {
        let mut paths: Vec<_> = self
            .entries
            .keys()
            .filter(|(t, _)| *t == rtype)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct DirBlobs {
    root: PathBuf,
    unsynced: Vec<PathBuf>,
}

impl DirBlobs {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for rtype in ResourceType::ALL {
            let dir = root.join(rtype.dir_name());
            fs::create_dir_all(&dir).map_err(|e| UpdateError::io(&dir, e))?;
        }
        Ok(Self {
            root,
            unsynced: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, rtype: ResourceType, path: &str) -> PathBuf {
        let mut file = self.root.join(rtype.dir_name());
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            file.push(segment);
        }
        file
    }

    fn collect(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(UpdateError::io(dir, e).into()),
        };
        for entry in entries {
            let entry = entry.map_err(|e| UpdateError::io(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            let file_type = entry.file_type().map_err(|e| UpdateError::io(entry.path(), e))?;
            if file_type.is_dir() {
                Self::collect(&entry.path(), &path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl BlobStore for DirBlobs {
    fn write(&mut self, rtype: ResourceType, path: &str, data: &[u8]) -> Result<()> {
        let file = self.file(rtype, path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| UpdateError::io(parent, e))?;
        }
        fs::write(&file, data).map_err(|e| UpdateError::io(&file, e))?;
        trace!(path = %file.display(), bytes = data.len(), "wrote resource");
        self.unsynced.push(file);
        Ok(())
    }

    fn read(&self, rtype: ResourceType, path: &str) -> Result<Option<Vec<u8>>> {
        let file = self.file(rtype, path);
        match fs::read(&file) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(UpdateError::io(&file, e).into()),
        }
    }

    fn delete(&mut self, path: &str) -> Result<usize> {
        let mut removed = 0;
        for rtype in ResourceType::ALL {
            let mut matching = Vec::new();
            Self::collect(&self.root.join(rtype.dir_name()), "", &mut matching)?;
            for resource in matching.iter().filter(|p| is_within(p, path)) {
                let file = self.file(rtype, resource);
                fs::remove_file(&file).map_err(|e| UpdateError::io(&file, e))?;
                removed += 1;
            }
        }
        self.unsynced.retain(|file| file.exists());
        debug!(path, removed, "deleted resources");
        Ok(removed)
    }

    fn rename(&mut self, source: &str, target: &str) -> Result<usize> {
        let mut moved = 0;
        for rtype in ResourceType::ALL {
            let mut matching = Vec::new();
            Self::collect(&self.root.join(rtype.dir_name()), "", &mut matching)?;
            for resource in matching.iter().filter(|p| is_within(p, source)) {
                let from = self.file(rtype, resource);
                let to = self.file(rtype, &rebase(resource, source, target));
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent).map_err(|e| UpdateError::io(parent, e))?;
                }
                fs::rename(&from, &to).map_err(|e| UpdateError::io(&from, e))?;
                self.unsynced.push(to);
                moved += 1;
            }
        }
        self.unsynced.retain(|file| file.exists());
        Ok(moved)
    }

    fn paths(&self, rtype: ResourceType) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        Self::collect(&self.root.join(rtype.dir_name()), "", &mut paths)?;
        paths.sort();
        Ok(paths)
    }

    fn sync(&mut self) -> Result<()> {
        for file in self.unsynced.drain(..) {
            let handle = fs::File::open(&file).map_err(|e| UpdateError::io(&file, e))?;
            handle.sync_all().map_err(|e| UpdateError::io(&file, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(blobs: &mut dyn BlobStore) {
        blobs.write(ResourceType::Binary, "img/a.png", b"A").unwrap();
        blobs.write(ResourceType::Binary, "img/b.png", b"B").unwrap();
        blobs.write(ResourceType::Value, "img", b"V").unwrap();
        blobs.write(ResourceType::Binary, "imgx", b"X").unwrap();

        assert_eq!(blobs.rename("img", "pics").unwrap(), 3);
        assert_eq!(
            blobs.paths(ResourceType::Binary).unwrap(),
            vec!["imgx".to_string(), "pics/a.png".into(), "pics/b.png".into()]
        );
        assert_eq!(blobs.read(ResourceType::Value, "pics").unwrap(), Some(b"V".to_vec()));
        assert_eq!(blobs.read(ResourceType::Value, "img").unwrap(), None);

        assert_eq!(blobs.delete("pics").unwrap(), 3);
        assert_eq!(blobs.paths(ResourceType::Binary).unwrap(), vec!["imgx".to_string()]);
        blobs.sync().unwrap();
    }

    #[test]
    fn mem_blobs_rename_and_delete_by_prefix() {
        exercise(&mut MemBlobs::new());
    }

    #[test]
    fn dir_blobs_rename_and_delete_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut blobs = DirBlobs::open(dir.path()).unwrap();

        exercise(&mut blobs);

        assert!(dir.path().join(RAW_DIR).join("imgx").exists());
    }
}
