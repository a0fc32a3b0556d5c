use std::fs::OpenOptions;
use std::io::Read;
use std::path::Path;

use crate::{CoreError, Result};

/// Reads a whole input file once, refusing anything above `limit` bytes.
pub fn read_source(path: impl AsRef<Path>, limit: u64) -> Result<Vec<u8>> {
    let file = OpenOptions::new()
        .read(true)
        .write(false)
        .open(path.as_ref())?;

    #[cfg(target_os = "linux")]
    {
        use rustix::fs::{Advice, fadvise};
        let _ = fadvise(&file, 0, None, Advice::Sequential);
        let _ = fadvise(&file, 0, None, Advice::NoReuse);
    }

    let size = file.metadata()?.len();
    if size > limit {
        return Err(CoreError::TooLarge { size, limit });
    }

    // The size can change underneath us; the take() bound still holds.
    let mut buffer = Vec::with_capacity(size as usize);
    file.take(limit.saturating_add(1)).read_to_end(&mut buffer)?;
    if buffer.len() as u64 > limit {
        return Err(CoreError::TooLarge {
            size: buffer.len() as u64,
            limit,
        });
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_whole_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        assert_eq!(read_source(file.path(), 10).unwrap(), b"0123456789");
    }

    #[test]
    fn rejects_oversized() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        let err = read_source(file.path(), 63).unwrap_err();
        assert!(matches!(err, CoreError::TooLarge { size: 64, limit: 63 }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_source(dir.path().join("absent"), 10),
            Err(CoreError::Io(_))
        ));
    }
}
