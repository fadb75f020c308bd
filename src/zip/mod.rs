//! ZIP archive parsing, reading and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`reader`]: Member data access with decompression and CRC checks
//! - [`writer`]: Streaming writer used for every output part
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading starts at the EOCD, then the Central Directory, so listing an
//! archive never touches member data.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions when reading
//! - STORED and DEFLATE compression methods
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods
//! - Written archives are limited to 4 GiB and 65535 members

mod parser;
mod reader;
mod structures;
mod writer;

pub use parser::ZipParser;
pub use reader::ZipReader;
pub use structures::*;
pub use writer::ZipWriter;

#[cfg(test)]
pub(crate) mod testutil {
    use crate::io::ReadAt;
    use anyhow::Result;
    use async_trait::async_trait;

    /// In-memory byte source.
    pub struct MemoryReader(pub Vec<u8>);

    #[async_trait]
    impl ReadAt for MemoryReader {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let start = (offset as usize).min(self.0.len());
            let n = buf.len().min(self.0.len() - start);
            buf[..n].copy_from_slice(&self.0[start..start + n]);
            Ok(n)
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }
    }
}
