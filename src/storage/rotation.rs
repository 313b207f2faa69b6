use crate::error::{Error, Result};
use crate::meta::{meta_path_from_data, to_data_path, MetadataFile};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Length of the random component in temp file names
const TEMP_RAND_LEN: usize = 16;

/// An open data file that lives under a hidden temp name until finalized.
///
/// The temp file sits in the same directory as the final data path so the
/// closing rename never crosses a filesystem boundary.
pub struct TempHandle {
    writer: BufWriter<NamedTempFile>,
    data_path: PathBuf,
    meta_path: PathBuf,
    bytes_written: u64,
}

impl std::fmt::Debug for TempHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempHandle")
            .field("temp_path", &self.temp_path())
            .field("data_path", &self.data_path)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

/// Create `.temp-<random>-<name>.sigmf-data` next to the final data file.
pub fn open(target: impl AsRef<Path>) -> Result<TempHandle> {
    let data_path = to_data_path(target);
    let meta_path = meta_path_from_data(&data_path);

    let dir = match data_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let temp = tempfile::Builder::new()
        .prefix(".temp-")
        .rand_bytes(TEMP_RAND_LEN)
        .suffix(&format!("-{file_name}"))
        .tempfile_in(&dir)
        .map_err(|e| Error::io_at(&dir, e))?;

    tracing::debug!(temp = ?temp.path(), data = ?data_path, "opened temp data file");

    Ok(TempHandle {
        writer: BufWriter::new(temp),
        data_path,
        meta_path,
        bytes_written: 0,
    })
}

/// Close the data file, write the sidecar, then rename the data file into
/// place. The rename is the last step.
///
/// On failure the temp data file is kept on disk and the error is
/// `Unfinalized`, naming where the samples are.
pub fn finalize(handle: TempHandle, meta: &MetadataFile) -> Result<(PathBuf, PathBuf)> {
    let TempHandle {
        mut writer,
        data_path,
        meta_path,
        ..
    } = handle;

    let flushed = writer.flush().map_err(|e| Error::io_at(&data_path, e));
    let (temp, _) = writer.into_parts();

    let prepared = flushed
        .and_then(|_| {
            temp.as_file()
                .sync_all()
                .map_err(|e| Error::io_at(temp.path(), e))
        })
        .and_then(|_| meta.save_path(&meta_path));
    if let Err(e) = prepared {
        return Err(keep_temp(temp, e));
    }

    if let Err(e) = temp.persist(&data_path) {
        return Err(keep_temp(e.file, Error::io_at(&data_path, e.error)));
    }

    tracing::info!(data = ?data_path, meta = ?meta_path, "finalized recording");
    Ok((data_path, meta_path))
}

/// Detach the temp file so it outlives the failed finalize.
fn keep_temp(temp: NamedTempFile, cause: Error) -> Error {
    let path = temp.path().to_path_buf();
    if let Err(e) = temp.into_temp_path().keep() {
        tracing::error!(temp = ?path, error = %e.error, "failed to keep temp data file");
        return cause;
    }
    tracing::error!(temp = ?path, error = %cause, "recording left in temp file");
    Error::Unfinalized {
        temp: path,
        source: Box::new(cause),
    }
}

impl TempHandle {
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| Error::io_at(self.writer.get_ref().path(), e))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn temp_path(&self) -> &Path {
        self.writer.get_ref().path()
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Leftover `.temp-` files in a directory, e.g. after a crash.
pub fn orphaned_temp_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io_at(dir, e))? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(".temp-"))
            .unwrap_or(false);
        if is_temp {
            found.push(path);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MetaNamespace;

    #[test]
    fn test_temp_name_shape() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open(dir.path().join("rec.sigmf-meta")).unwrap();

        let name = handle.temp_path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with(".temp-"));
        assert!(name.ends_with("-rec.sigmf-data"));
        assert_eq!(name.len(), ".temp-".len() + TEMP_RAND_LEN + "-rec.sigmf-data".len());
        assert_eq!(handle.temp_path().parent(), Some(dir.path()));
        assert_eq!(handle.data_path(), dir.path().join("rec.sigmf-data"));
    }

    #[test]
    fn test_concurrent_opens_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = open(dir.path().join("same")).unwrap();
        let b = open(dir.path().join("same")).unwrap();
        assert_ne!(a.temp_path(), b.temp_path());
    }

    #[test]
    fn test_finalize_publishes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = open(dir.path().join("out")).unwrap();
        handle.write_all(&[1, 2, 3, 4]).unwrap();
        assert_eq!(handle.bytes_written(), 4);

        let meta = MetadataFile::new(MetaNamespace::global("ri8_le", "1.0.0"));
        let (data, meta_path) = finalize(handle, &meta).unwrap();

        assert_eq!(fs::read(&data).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(MetadataFile::load_path(&meta_path).unwrap(), meta);
        assert!(orphaned_temp_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_sidecar_keeps_temp_data() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("out.sigmf-meta")).unwrap();

        let mut handle = open(dir.path().join("out")).unwrap();
        handle.write_all(&[7; 32]).unwrap();
        let temp = handle.temp_path().to_path_buf();

        let meta = MetadataFile::new(MetaNamespace::global("ri8_le", "1.0.0"));
        match finalize(handle, &meta) {
            Err(Error::Unfinalized { temp: kept, source }) => {
                assert_eq!(kept, temp);
                assert!(source.is_io());
            }
            other => panic!("unexpected result {other:?}"),
        }

        assert_eq!(fs::read(&temp).unwrap(), vec![7; 32]);
        assert_eq!(orphaned_temp_files(dir.path()).unwrap(), vec![temp]);
        assert!(!dir.path().join("out.sigmf-data").exists());
    }
}
