//! Globus-GridFTP-style backend.
//!
//! Streams data in directly and honours the node's `extraRsl`/
//! `extraJssContact` passthrough fields the way `initSEtoGlobus` wired a
//! node up to the GridFTP/GRAM client in the original implementation —
//! here they are inert metadata since there is no real GRAM job submission
//! layer, but they round-trip through the node record untouched.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;

use super::{io_err, FsRoot, ScanEntry, StorageBackend};
use crate::error::DigsError;
use crate::node::Node;

pub struct GlobusBackend {
    fs: FsRoot,
}

impl GlobusBackend {
    pub fn new(node: &Node) -> Self {
        GlobusBackend { fs: FsRoot::new(node) }
    }
}

#[async_trait]
impl StorageBackend for GlobusBackend {
    async fn get_length(&self, _host: &str, path: &str) -> Result<u64, DigsError> {
        let meta = tokio::fs::metadata(self.fs.resolve(path))
            .await
            .map_err(|e| io_err("get_length", e))?;
        Ok(meta.len())
    }

    async fn get_checksum(&self, _host: &str, path: &str) -> Result<String, DigsError> {
        FsRoot::checksum(&self.fs.resolve(path)).await
    }

    async fn does_exist(&self, _host: &str, path: &str) -> Result<bool, DigsError> {
        Ok(tokio::fs::metadata(self.fs.resolve(path)).await.is_ok())
    }

    async fn is_directory(&self, _host: &str, path: &str) -> Result<bool, DigsError> {
        let meta = tokio::fs::metadata(self.fs.resolve(path))
            .await
            .map_err(|e| io_err("is_directory", e))?;
        Ok(meta.is_dir())
    }

    async fn get_modification_time(&self, _host: &str, path: &str) -> Result<u64, DigsError> {
        let meta = tokio::fs::metadata(self.fs.resolve(path))
            .await
            .map_err(|e| io_err("get_modification_time", e))?;
        let modified = meta.modified().map_err(|e| io_err("get_modification_time", e))?;
        Ok(modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs())
    }

    async fn get_permissions(&self, _host: &str, path: &str) -> Result<String, DigsError> {
        let meta = tokio::fs::metadata(self.fs.resolve(path))
            .await
            .map_err(|e| io_err("get_permissions", e))?;
        Ok(format!("{:o}", meta.permissions().mode() & 0o7777))
    }

    async fn set_permissions(&self, _host: &str, path: &str, mode_octal: &str) -> Result<(), DigsError> {
        let mode = u32::from_str_radix(mode_octal, 8)
            .map_err(|_| DigsError::invariant(format!("bad octal mode '{mode_octal}'")))?;
        tokio::fs::set_permissions(self.fs.resolve(path), std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| io_err("set_permissions", e))
    }

    async fn mkdir(&self, _host: &str, path: &str) -> Result<(), DigsError> {
        tokio::fs::create_dir(self.fs.resolve(path))
            .await
            .map_err(|e| io_err("mkdir", e))
    }

    async fn mkdirtree(&self, _host: &str, path: &str) -> Result<(), DigsError> {
        tokio::fs::create_dir_all(self.fs.resolve(path))
            .await
            .map_err(|e| io_err("mkdirtree", e))
    }

    async fn mv(&self, _host: &str, src: &str, dst: &str) -> Result<(), DigsError> {
        let dst_resolved = self.fs.resolve(dst);
        if let Some(parent) = dst_resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_err("mv", e))?;
        }
        tokio::fs::rename(self.fs.resolve(src), dst_resolved)
            .await
            .map_err(|e| io_err("mv", e))
    }

    async fn rm(&self, _host: &str, path: &str) -> Result<(), DigsError> {
        tokio::fs::remove_file(self.fs.resolve(path))
            .await
            .map_err(|e| io_err("rm", e))
    }

    async fn rmr(&self, _host: &str, path: &str) -> Result<(), DigsError> {
        let resolved = self.fs.resolve(path);
        let meta = tokio::fs::metadata(&resolved).await.map_err(|e| io_err("rmr", e))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(resolved).await.map_err(|e| io_err("rmr", e))
        } else {
            tokio::fs::remove_file(resolved).await.map_err(|e| io_err("rmr", e))
        }
    }

    async fn put(&self, _host: &str, local_path: &str, remote_path: &str) -> Result<(), DigsError> {
        let dest = self.fs.resolve(remote_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_err("put", e))?;
        }
        tokio::fs::copy(local_path, &dest).await.map_err(|e| io_err("put", e))?;
        Ok(())
    }

    async fn get(&self, _host: &str, remote_path: &str, local_path: &str) -> Result<(), DigsError> {
        tokio::fs::copy(self.fs.resolve(remote_path), local_path)
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
        let dest = self.fs.resolve(dest_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_err("copy_from_inbox", e))?;
        }
        tokio::fs::rename(self.fs.resolve_inbox(staged_name), dest)
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

    async fn scan_node(&self, _host: &str, root: &str) -> Result<Vec<ScanEntry>, DigsError> {
        scan_tree(&self.fs.resolve(root)).await
    }

    async fn scan_inbox(&self, _host: &str) -> Result<Vec<String>, DigsError> {
        scan_inbox_names(&self.fs.inbox).await
    }

    async fn ping(&self, _host: &str) -> Result<(), DigsError> {
        tokio::fs::metadata(&self.fs.root).await.map_err(|e| io_err("ping", e))?;
        Ok(())
    }
}

pub(crate) async fn scan_tree(root: &std::path::Path) -> Result<Vec<ScanEntry>, DigsError> {
    if tokio::fs::metadata(root).await.is_err() {
        return Ok(Vec::new());
    }
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                let data = std::fs::read(entry.path()).unwrap_or_default();
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();
                out.push(ScanEntry {
                    path: rel,
                    size: data.len() as u64,
                    checksum: super::simple_hex_digest(&data),
                });
            }
        }
        out
    })
    .await
    .map_err(|e| DigsError::protocol(format!("scan_node join error: {e}")))
}

pub(crate) async fn scan_inbox_names(inbox: &std::path::Path) -> Result<Vec<String>, DigsError> {
    if tokio::fs::metadata(inbox).await.is_err() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    let mut rd = tokio::fs::read_dir(inbox).await.map_err(|e| io_err("scan_inbox", e))?;
    while let Some(entry) = rd.next_entry().await.map_err(|e| io_err("scan_inbox", e))? {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
