use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use log::debug;
use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::Result;

use super::types::SourceInfo;

const DIGEST_BUFFER_SIZE: usize = 8 * 1024;

/// Firmware file opened for relaying, with its size and digest already known.
#[derive(Debug)]
pub struct RelaySource {
    path: PathBuf,
    file: File,
    info: SourceInfo,
}

impl RelaySource {
    /// Opens `path`, hashes it and rewinds to the start. Any failure here
    /// happens before a relay session touches the network.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;

        let mut hasher = Md5::new();
        let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        file.seek(SeekFrom::Start(0)).await?;

        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hasher.finalize());
        debug!(
            "Opened {} ({} bytes, md5 {})",
            path.display(),
            size,
            hex::encode(digest)
        );

        Ok(Self {
            path,
            file,
            info: SourceInfo { size, digest },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    pub fn into_parts(self) -> (File, SourceInfo) {
        (self.file, self.info)
    }
}
