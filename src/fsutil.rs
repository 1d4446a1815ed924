//! Atomic file persistence.
//!
//! The sole durability primitive in the grid: every persistable table
//! (node list, status lists) is rewritten whole to a sibling temp file and
//! renamed over the original. No in-place edits.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Error};

/// Writes `data` to a temp file next to `path` and atomically renames it
/// into place. Equivalent to the original `.new` + rename convention used
/// for `mainnodelist.conf` and friends (spec section 4.1/6).
pub fn replace_file_contents(path: impl AsRef<Path>, data: &[u8]) -> Result<(), Error> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("new");

    let mut file = std::fs::File::create(&tmp_path)
        .with_context(|| format!("unable to create temp file {:?}", tmp_path))?;

    if let Err(err) = file.write_all(data).and_then(|_| file.sync_all()) {
        let _ = std::fs::remove_file(&tmp_path);
        bail!("write failed for {:?}: {}", tmp_path, err);
    }
    drop(file);

    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        bail!("atomic rename failed for {:?}: {}", path, err);
    }

    Ok(())
}

/// Reads a file's full contents, treating "does not exist" as empty rather
/// than an error — readers must tolerate either the old or new file being
/// momentarily absent around a rename (spec section 4.1).
pub fn read_to_string_or_empty(path: impl AsRef<Path>) -> Result<String, Error> {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(s) => Ok(s),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("unable to read {:?}", path.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_is_atomic_and_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mainnodelist.conf");

        replace_file_contents(&path, b"node=a\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "node=a\n");

        replace_file_contents(&path, b"node=b\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "node=b\n");

        // no leftover temp file
        let leftover: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n != "mainnodelist.conf")
            .collect();
        assert!(leftover.is_empty(), "leftover: {:?}", leftover);
    }

    #[test]
    fn temp_file_replaces_extension_rather_than_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mainnodelist.conf");
        assert_eq!(
            path.with_extension("new"),
            dir.path().join("mainnodelist.new"),
        );
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.conf");
        assert_eq!(read_to_string_or_empty(&path).unwrap(), "");
    }
}
