use std::path::Path;

use bytes::Bytes;

use crate::checksum;
use crate::error::Result;
use crate::protocols::zip::CHUNK_SIZE;

/// Firmware bytes served to a node, addressed by 1-based chunk number.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Bytes,
}

impl FirmwareImage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Ok(Self::new(data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn total_chunks(&self) -> usize {
        self.data.len().div_ceil(CHUNK_SIZE)
    }

    /// Chunk `number`, shorter for the final chunk and empty outside the image.
    pub fn chunk(&self, number: u32) -> &[u8] {
        let Some(index) = (number as usize).checked_sub(1) else {
            return &[];
        };
        let start = index.saturating_mul(CHUNK_SIZE).min(self.data.len());
        let end = start.saturating_add(CHUNK_SIZE).min(self.data.len());
        &self.data[start..end]
    }

    /// CRC-16 over the whole image, announced in the update request.
    pub fn checksum(&self) -> u16 {
        checksum::compute(&self.data)
    }
}

/// Whether the node's Request Report must arrive before chunks are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Send the request and go straight to waiting for chunk requests.
    Assume,
    /// Wait up to the ack timeout for a Request Report; fail without one.
    Require,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The report flagged as last went out.
    Completed { reports_sent: usize },
    /// No chunk request arrived within the window. The transfer is dropped,
    /// never retried here.
    Abandoned { reports_sent: usize },
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }

    pub fn reports_sent(&self) -> usize {
        match *self {
            TransferOutcome::Completed { reports_sent } | TransferOutcome::Abandoned { reports_sent } => {
                reports_sent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(FirmwareImage::new(vec![0u8; 0]).total_chunks(), 0);
        assert_eq!(FirmwareImage::new(vec![0u8; 1]).total_chunks(), 1);
        assert_eq!(FirmwareImage::new(vec![0u8; 40]).total_chunks(), 1);
        assert_eq!(FirmwareImage::new(vec![0u8; 41]).total_chunks(), 2);
        assert_eq!(FirmwareImage::new(vec![0u8; 100]).total_chunks(), 3);
    }

    #[test]
    fn chunks_are_one_based() {
        let data: Vec<u8> = (0..100).collect();
        let image = FirmwareImage::new(data.clone());

        assert!(image.chunk(0).is_empty());
        assert_eq!(image.chunk(1), &data[..40]);
        assert_eq!(image.chunk(2), &data[40..80]);
        assert_eq!(image.chunk(3), &data[80..]);
        assert!(image.chunk(4).is_empty());
        assert!(image.chunk(u32::MAX).is_empty());
    }
}
