use std::path::Path;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::types::Result;

/// File system utilities
pub struct FsUtils;

impl FsUtils {
    /// Ensure the directory exists
    pub async fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();

        if !fs::try_exists(path).await? {
            fs::create_dir_all(path).await?;
        }

        Ok(())
    }

    /// Replace a file's contents atomically, owner read/write only.
    ///
    /// Contents are written to a sibling temp file which is then renamed over
    /// the target, so readers never observe a partial write.
    pub async fn write_file_atomic<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = path.parent() {
            Self::ensure_dir_exists(parent).await?;
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| Error::Internal(format!("Not a file path: {:?}", path)))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        {
            let mut file = Self::open_private(&tmp_path, false).await?;
            file.write_all(contents.as_ref()).await?;
            file.sync_all().await?;
        }

        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Append one line to a file, creating it if needed
    pub async fn append_line<P: AsRef<Path>>(path: P, line: &str) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            Self::ensure_dir_exists(parent).await?;
        }

        let mut file = Self::open_private(path, true).await?;
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read a file line by line, skipping blank lines
    pub async fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let contents = match Self::read_optional(path).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|e| Error::Internal(format!("File is not valid UTF-8: {}", e)))?,
            None => return Ok(Vec::new()),
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Read a file if it exists
    pub async fn read_optional<P: AsRef<Path>>(path: P) -> Result<Option<Vec<u8>>> {
        let path = path.as_ref();

        if !fs::try_exists(path).await? {
            return Ok(None);
        }

        Ok(Some(fs::read(path).await?))
    }

    async fn open_private(path: &Path, append: bool) -> Result<fs::File> {
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        #[cfg(unix)]
        options.mode(0o600);

        Ok(options.open(path).await?)
    }
}
