//! Structure files on disk
//!
//! Documents live where the game server looks for generated templates:
//! `<root>/<namespace>/structures/<name>.nbt`. Files are disposable once
//! the server has placed them.

use std::path::{Path, PathBuf};

use super::StructureError;
use super::encoder::StructureDocument;

/// A saved structure the server can load by `namespace:name`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructureHandle {
    pub namespace: String,
    pub name: String,
    pub path: PathBuf,
}

impl StructureHandle {
    /// Template id for `place template`
    pub fn template_id(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// Writes and removes structure files under one namespace
#[derive(Clone, Debug)]
pub struct StructureStore {
    root: PathBuf,
    namespace: String,
}

impl StructureStore {
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Directory holding this namespace's structures
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.namespace).join("structures")
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir().join(format!("{}.nbt", name))
    }

    /// Encode and write a document. The file appears atomically.
    pub async fn save(
        &self,
        name: &str,
        document: &StructureDocument,
    ) -> Result<StructureHandle, StructureError> {
        validate_name(name)?;
        let bytes = document.encode()?;
        let path = self.path_for(name);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("nbt.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        log::debug!("Saved structure {}:{} ({} bytes)", self.namespace, name, bytes.len());
        Ok(StructureHandle {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            path,
        })
    }

    pub async fn load(&self, name: &str) -> Result<StructureDocument, StructureError> {
        validate_name(name)?;
        let bytes = tokio::fs::read(self.path_for(name)).await?;
        StructureDocument::decode(&bytes)
    }

    pub async fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && tokio::fs::try_exists(self.path_for(name)).await.unwrap_or(false)
    }

    /// Delete a placed structure; a missing file is not an error.
    pub async fn remove(&self, handle: &StructureHandle) -> Result<(), StructureError> {
        remove_if_exists(&handle.path).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StructureError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Names become both a file name and part of a console command.
fn validate_name(name: &str) -> Result<(), StructureError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StructureError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::{BlockSpec, VoxelCanvas};
    use glam::IVec3;

    fn document() -> StructureDocument {
        let mut canvas = VoxelCanvas::default();
        canvas
            .set_voxel(IVec3::new(1, 2, 3), &BlockSpec::parse("stone").unwrap())
            .unwrap();
        StructureDocument::from_canvas(&canvas).unwrap()
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = StructureStore::new(dir.path(), "plotcraft");
        let doc = document();

        let handle = store.save("build_1", &doc).await.unwrap();
        assert_eq!(handle.template_id(), "plotcraft:build_1");
        assert_eq!(handle.path, dir.path().join("plotcraft/structures/build_1.nbt"));
        assert!(store.exists("build_1").await);
        assert_eq!(store.load("build_1").await.unwrap(), doc);

        store.remove(&handle).await.unwrap();
        assert!(!store.exists("build_1").await);
        store.remove(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = StructureStore::new(dir.path(), "plotcraft");

        for name in ["../escape", "a/b", "", "UPPER", ".hidden", "x y"] {
            assert!(
                matches!(store.save(name, &document()).await, Err(StructureError::InvalidName(_))),
                "accepted {:?}",
                name
            );
        }
    }
}
