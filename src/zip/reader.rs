use flate2::Crc;
use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Upper bound on the expected inflate ratio when sizing output buffers.
const MAX_PREALLOC_RATIO: u64 = 16;

/// Reads member data out of a ZIP archive.
pub struct ZipReader<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipReader<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all members in central directory order
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Read and decompress one member, verifying its CRC-32.
    pub async fn read_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            bail!("{} is encrypted", entry.file_name);
        }

        let data_offset = self.parser.get_data_offset(entry).await?;

        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.parser
            .reader()
            .read_exact_at(data_offset, &mut raw)
            .await?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => {
                if entry.compressed_size != entry.uncompressed_size {
                    bail!(
                        "{} is stored but sizes differ ({} != {})",
                        entry.file_name,
                        entry.compressed_size,
                        entry.uncompressed_size
                    );
                }
                raw
            }
            CompressionMethod::Deflate => {
                // The declared size may lie. Bound the reservation and stop
                // one byte past it so the length check below catches overruns.
                let mut out = Vec::new();
                out.try_reserve(
                    entry
                        .uncompressed_size
                        .min(raw.len() as u64 * MAX_PREALLOC_RATIO) as usize,
                )
                .with_context(|| format!("cannot allocate buffer for {}", entry.file_name))?;
                DeflateDecoder::new(raw.as_slice())
                    .take(entry.uncompressed_size.saturating_add(1))
                    .read_to_end(&mut out)
                    .with_context(|| format!("failed to inflate {}", entry.file_name))?;
                if out.len() as u64 != entry.uncompressed_size {
                    bail!(
                        "{} inflated to {} bytes, expected {}",
                        entry.file_name,
                        out.len(),
                        entry.uncompressed_size
                    );
                }
                out
            }
            CompressionMethod::Unknown(method) => {
                bail!(
                    "Unsupported compression method {} for {} (only STORED and DEFLATE are supported)",
                    method,
                    entry.file_name
                );
            }
        };

        let mut crc = Crc::new();
        crc.update(&data);
        if crc.sum() != entry.crc32 {
            bail!(
                "CRC mismatch for {}: expected {:08x}, got {:08x}",
                entry.file_name,
                entry.crc32,
                crc.sum()
            );
        }

        Ok(data)
    }
}
