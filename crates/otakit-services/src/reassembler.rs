//! Image reassembly — collects chunks for one transfer and emits the file.
//!
//! One reassembler tracks one transfer at a time: the chunk stream arrives
//! on a per-download unique topic, so chunks need no transfer id. Delivery
//! must be strictly in index order; any violation aborts the transfer and
//! returns the buffer to idle. A chunk with index 0 always starts a fresh
//! transfer, which is how a subscriber recovers from an earlier abort
//! without any external signal.

use bytes::Bytes;
use std::path::{Path, PathBuf};

use otakit_core::wire::{self, WireError, HEADER_SIZE};

/// Progress reported for one accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Chunk buffered; more expected.
    Collecting { index: u32, total: u32 },
    /// Final chunk received and validated; the image was written here.
    Complete(PathBuf),
}

/// Why a transfer was aborted. One distinct reason per validation check.
#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    MalformedHeader(#[from] WireError),

    #[error("bad chunk magic: '{}'", .found.escape_ascii())]
    BadMagic { found: [u8; 8] },

    #[error("chunk out of order: expected index {expected}, got {got} (of {total})")]
    OutOfOrderChunk { expected: u32, got: u32, total: u32 },

    #[error("payload size mismatch: header declares {declared}, actual {actual}")]
    SizeMismatch { declared: u32, actual: u32 },

    #[error("incomplete transfer: final chunk declares {expected} payloads, buffered {buffered}")]
    IncompleteTransfer { expected: u32, buffered: u32 },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Accumulates chunk payloads in index order and writes the concatenation
/// to `output_path` when the final chunk lands.
pub struct ImageReassembler {
    output_path: PathBuf,
    chunks: Vec<Bytes>,
}

impl ImageReassembler {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            chunks: Vec::new(),
        }
    }

    /// True when no transfer is in flight.
    pub fn is_idle(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks_buffered(&self) -> usize {
        self.chunks.len()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Feed one inbound chunk message (header + payload).
    ///
    /// Every error aborts the transfer: the buffer is discarded and the
    /// reassembler returns to idle, ready for a fresh chunk 0. No output
    /// file is left behind on failure.
    pub fn accept(&mut self, message: &[u8]) -> Result<Progress, ReassemblyError> {
        match self.validate_and_store(message) {
            Ok(progress) => Ok(progress),
            Err(e) => {
                if !self.chunks.is_empty() {
                    tracing::warn!(discarded = self.chunks.len(), "aborting transfer");
                    self.chunks.clear();
                }
                Err(e)
            }
        }
    }

    fn validate_and_store(&mut self, message: &[u8]) -> Result<Progress, ReassemblyError> {
        let header = wire::decode(message)?;
        if !header.magic_is_valid() {
            return Err(ReassemblyError::BadMagic {
                found: header.magic,
            });
        }

        let index = u32::from(header.payload_index.get());
        let total = header.total_payloads.get();

        // The first chunk of an image resets any stale partial transfer.
        if index == 0 && !self.chunks.is_empty() {
            tracing::warn!(
                discarded = self.chunks.len(),
                "chunk 0 received mid-transfer, restarting"
            );
            self.chunks.clear();
        }

        let expected = self.chunks.len() as u32;
        if index != expected || index >= total {
            return Err(ReassemblyError::OutOfOrderChunk {
                expected,
                got: index,
                total,
            });
        }

        let actual = (message.len() - HEADER_SIZE) as u32;
        let declared = header.payload_size.get();
        if declared != actual {
            return Err(ReassemblyError::SizeMismatch { declared, actual });
        }

        self.chunks
            .push(Bytes::copy_from_slice(&message[HEADER_SIZE..]));
        tracing::debug!(index, total, bytes = actual, "chunk buffered");

        if index == total - 1 {
            return self.emit(total).map(Progress::Complete);
        }
        Ok(Progress::Collecting { index, total })
    }

    /// Concatenate the buffered payloads and write the image in one pass.
    fn emit(&mut self, total: u32) -> Result<PathBuf, ReassemblyError> {
        let buffered = self.chunks.len() as u32;
        if buffered != total {
            return Err(ReassemblyError::IncompleteTransfer {
                expected: total,
                buffered,
            });
        }

        let size: usize = self.chunks.iter().map(Bytes::len).sum();
        let mut image = Vec::with_capacity(size);
        for chunk in &self.chunks {
            image.extend_from_slice(chunk);
        }

        if let Err(source) = std::fs::write(&self.output_path, &image) {
            // Don't leave a short file behind.
            let _ = std::fs::remove_file(&self.output_path);
            return Err(ReassemblyError::WriteFailed {
                path: self.output_path.clone(),
                source,
            });
        }

        tracing::info!(
            path = %self.output_path.display(),
            bytes = image.len(),
            chunks = total,
            "image reassembled"
        );
        self.chunks.clear();
        Ok(self.output_path.clone())
    }

    /// Seed the buffer directly, bypassing per-chunk validation.
    #[cfg(test)]
    fn with_buffered(output_path: impl Into<PathBuf>, payloads: Vec<Bytes>) -> Self {
        Self {
            output_path: output_path.into(),
            chunks: payloads,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
