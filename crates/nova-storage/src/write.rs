use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::header::{content_hash, ArtifactKind, Compression, StorageHeader};
use crate::persisted::StorageError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default zstd level used for [`Compression::Zstd`].
const ZSTD_LEVEL: i32 = 0;

/// Writes `payload` as a framed artifact (header + optionally compressed
/// payload) to `path`.
///
/// The file is written to a unique temporary sibling and renamed into place,
/// so readers observe either the previous artifact or the new one.
pub fn write_artifact_atomic(
    path: &Path,
    kind: ArtifactKind,
    schema_version: u32,
    payload: &[u8],
    compression: Compression,
) -> Result<(), StorageError> {
    let stored = match compression {
        Compression::None => None,
        Compression::Zstd => Some(
            zstd::bulk::compress(payload, ZSTD_LEVEL)
                .map_err(|e| StorageError::Decompression(e.to_string()))?,
        ),
    };
    let stored_payload = stored.as_deref().unwrap_or(payload);

    let header = StorageHeader::new(
        kind,
        schema_version,
        compression,
        stored_payload.len() as u64,
        payload.len() as u64,
        content_hash(payload),
    );

    atomic_write_with(path, |file| {
        file.write_all(&header.encode())?;
        file.write_all(stored_payload)?;
        Ok(())
    })
}

/// Atomically replaces `path` with `bytes` (no framing).
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    atomic_write_with(path, |file| {
        file.write_all(bytes)?;
        Ok(())
    })
}

fn atomic_write_with(
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> io::Result<()>,
) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => return Err(StorageError::InvalidHeader("missing parent directory")),
    };
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let result = (|| -> io::Result<()> {
        write(&mut file)?;
        file.sync_all()?;
        drop(file);
        rename_overwrite(&tmp_path, path)
    })();

    if let Err(err) = result {
        if let Err(remove_err) = fs::remove_file(&tmp_path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target = "nova.storage",
                    path = %tmp_path.display(),
                    error = %remove_err,
                    "failed to remove temporary file after write failure"
                );
            }
        }
        return Err(err.into());
    }

    Ok(())
}

fn rename_overwrite(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let mut attempts = 0usize;

    loop {
        match fs::rename(tmp_path, dest) {
            Ok(()) => return Ok(()),
            Err(err)
                if cfg!(windows)
                    && (err.kind() == io::ErrorKind::AlreadyExists || dest.exists()) =>
            {
                // On Windows, `rename` doesn't overwrite.
                match fs::remove_file(dest) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }

                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
