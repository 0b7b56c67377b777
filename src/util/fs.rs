use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

const DELETE_ATTEMPTS: u32 = 5;

/// Writes `contents` to `dst` using write-to-temp-then-rename.
///
/// The destination is either the previous file or the complete new one,
/// never a partial write.
pub fn atomic_write(dst: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut temp = temp_file_for(dst)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(dst).map_err(|e| e.error)?;
    Ok(())
}

fn temp_file_for(dst: &Path) -> std::io::Result<NamedTempFile> {
    let dir = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    // SEC-009: Randomized temp name in the destination directory so the
    // rename stays on one filesystem and cannot be pre-empted by a symlink.
    tempfile::Builder::new()
        .prefix(".repofeed-")
        .suffix(".tmp")
        .tempfile_in(dir)
}

/// Copies `src` onto `dst` atomically, replacing any existing file.
///
/// The content is streamed, so package-sized files are never held in memory.
pub fn atomic_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    let mut input = BufReader::new(std::fs::File::open(src)?);
    let temp = temp_file_for(dst)?;
    {
        let mut output = BufWriter::new(temp.as_file());
        std::io::copy(&mut input, &mut output)?;
        output.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(dst).map_err(|e| e.error)?;
    Ok(())
}

/// Removes a file, retrying briefly if the platform reports it busy.
///
/// A file that is already gone counts as deleted. Returns `false` when the
/// file still exists after all attempts.
pub async fn try_hard_to_delete(path: &Path) -> bool {
    for attempt in 0..DELETE_ATTEMPTS {
        match tokio::fs::remove_file(path).await {
            Ok(()) => return true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    attempt = attempt + 1,
                    error = %e,
                    "Delete failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt + 1))).await;
            }
        }
    }

    tracing::warn!(path = %path.display(), "Giving up on deleting file");
    false
}
