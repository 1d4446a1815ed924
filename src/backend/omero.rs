//! OMERO-style backend.
//!
//! OMERO is an image-metadata repository addressed by object identifier
//! rather than a directory tree (`initSEtoOMERO` in the original never
//! wires up directory RSL/JSS fields at all). Directory operations are
//! no-ops here rather than errors, and LFNs are stored flat under the
//! node's root keyed by their DIR-encoded form, since OMERO has no concept
//! of nested collections the way a filesystem-backed SE does.

use async_trait::async_trait;

use crate::error::DigsError;
use crate::lfn;
use crate::node::Node;

use super::globus::scan_inbox_names;
use super::{io_err, FsRoot, ScanEntry, StorageBackend};

pub struct OmeroBackend {
    fs: FsRoot,
}

impl OmeroBackend {
    pub fn new(node: &Node) -> Self {
        OmeroBackend { fs: FsRoot::new(node) }
    }

    fn object_path(&self, lfn_or_path: &str) -> std::path::PathBuf {
        let flat = lfn::encode(lfn_or_path).unwrap_or_else(|_| lfn_or_path.to_string());
        self.fs.root.join(flat)
    }
}

#[async_trait]
impl StorageBackend for OmeroBackend {
    async fn get_length(&self, _host: &str, path: &str) -> Result<u64, DigsError> {
        let meta = tokio::fs::metadata(self.object_path(path))
            .await
            .map_err(|e| io_err("get_length", e))?;
        Ok(meta.len())
    }

    async fn get_checksum(&self, _host: &str, path: &str) -> Result<String, DigsError> {
        FsRoot::checksum(&self.object_path(path)).await
    }

    async fn does_exist(&self, _host: &str, path: &str) -> Result<bool, DigsError> {
        Ok(tokio::fs::metadata(self.object_path(path)).await.is_ok())
    }

    async fn is_directory(&self, _host: &str, _path: &str) -> Result<bool, DigsError> {
        // OMERO has no directories; every object is a leaf.
        Ok(false)
    }

    async fn get_modification_time(&self, _host: &str, path: &str) -> Result<u64, DigsError> {
        let meta = tokio::fs::metadata(self.object_path(path))
            .await
            .map_err(|e| io_err("get_modification_time", e))?;
        let modified = meta.modified().map_err(|e| io_err("get_modification_time", e))?;
        Ok(modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs())
    }

    async fn get_permissions(&self, _host: &str, _path: &str) -> Result<String, DigsError> {
        // OMERO permissions are group/ACL based, not POSIX bits.
        Ok("644".to_string())
    }

    async fn set_permissions(&self, _host: &str, _path: &str, _mode_octal: &str) -> Result<(), DigsError> {
        Ok(())
    }

    async fn mkdir(&self, _host: &str, _path: &str) -> Result<(), DigsError> {
        Ok(())
    }

    async fn mkdirtree(&self, _host: &str, _path: &str) -> Result<(), DigsError> {
        Ok(())
    }

    async fn mv(&self, _host: &str, src: &str, dst: &str) -> Result<(), DigsError> {
        tokio::fs::rename(self.object_path(src), self.object_path(dst))
            .await
            .map_err(|e| io_err("mv", e))
    }

    async fn rm(&self, _host: &str, path: &str) -> Result<(), DigsError> {
        tokio::fs::remove_file(self.object_path(path))
            .await
            .map_err(|e| io_err("rm", e))
    }

    async fn rmr(&self, host: &str, path: &str) -> Result<(), DigsError> {
        // No directories to recurse into; equivalent to rm.
        self.rm(host, path).await
    }

    async fn put(&self, _host: &str, local_path: &str, remote_path: &str) -> Result<(), DigsError> {
        tokio::fs::create_dir_all(&self.fs.root).await.map_err(|e| io_err("put", e))?;
        tokio::fs::copy(local_path, self.object_path(remote_path))
            .await
            .map_err(|e| io_err("put", e))?;
        Ok(())
    }

    async fn get(&self, _host: &str, remote_path: &str, local_path: &str) -> Result<(), DigsError> {
        tokio::fs::copy(self.object_path(remote_path), local_path)
            .await
            .map_err(|e| io_err("get", e))?;
        Ok(())
    }

    async fn copy_to_inbox(&self, _host: &str, local_path: &str, staged_name: &str) -> Result<(), DigsError> {
        tokio::fs::create_dir_all(&self.fs.inbox).await.map_err(|e| io_err("copy_to_inbox", e))?;
        tokio::fs::copy(local_path, self.fs.resolve_inbox(staged_name))
            .await
            .map_err(|e| io_err("copy_to_inbox", e))?;
        Ok(())
    }

    async fn copy_from_inbox(&self, _host: &str, staged_name: &str, dest_path: &str) -> Result<(), DigsError> {
        tokio::fs::create_dir_all(&self.fs.root).await.map_err(|e| io_err("copy_from_inbox", e))?;
        tokio::fs::rename(self.fs.resolve_inbox(staged_name), self.object_path(dest_path))
            .await
            .map_err(|e| io_err("copy_from_inbox", e))
    }

    async fn inbox_file_length(&self, _host: &str, staged_name: &str) -> Result<u64, DigsError> {
        let meta = tokio::fs::metadata(self.fs.resolve_inbox(staged_name))
            .await
            .map_err(|e| io_err("inbox_file_length", e))?;
        Ok(meta.len())
    }

    async fn inbox_file_checksum(&self, _host: &str, staged_name: &str) -> Result<String, DigsError> {
        FsRoot::checksum(&self.fs.resolve_inbox(staged_name)).await
    }

    async fn remove_inbox_file(&self, _host: &str, staged_name: &str) -> Result<(), DigsError> {
        tokio::fs::remove_file(self.fs.resolve_inbox(staged_name))
            .await
            .map_err(|e| io_err("remove_inbox_file", e))
    }

    async fn inbox_file_age(&self, _host: &str, staged_name: &str) -> Result<std::time::Duration, DigsError> {
        FsRoot::age(&self.fs.resolve_inbox(staged_name)).await
    }

    async fn scan_node(&self, _host: &str, _root: &str) -> Result<Vec<ScanEntry>, DigsError> {
        if tokio::fs::metadata(&self.fs.root).await.is_err() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.fs.root)
            .await
            .map_err(|e| io_err("scan_node", e))?;
        while let Some(entry) = rd.next_entry().await.map_err(|e| io_err("scan_node", e))? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                let data = tokio::fs::read(entry.path()).await.unwrap_or_default();
                let name = entry.file_name().to_string_lossy().to_string();
                out.push(ScanEntry {
                    path: lfn::decode(&name),
                    size: data.len() as u64,
                    checksum: super::simple_hex_digest(&data),
                });
            }
        }
        Ok(out)
    }

    async fn scan_inbox(&self, _host: &str) -> Result<Vec<String>, DigsError> {
        scan_inbox_names(&self.fs.inbox).await
    }

    async fn ping(&self, _host: &str) -> Result<(), DigsError> {
        tokio::fs::metadata(&self.fs.root).await.map_err(|e| io_err("ping", e))?;
        Ok(())
    }
}
