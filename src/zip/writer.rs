//! Streaming ZIP writer.
//!
//! Members are compressed in memory, then written as local header plus data.
//! The central directory is accumulated and flushed by [`ZipWriter::finish`].
//! Output is plain ZIP (no ZIP64): members and offsets must fit in 32 bits and
//! the archive may hold at most 65535 members.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Crc;
use flate2::write::DeflateEncoder;
use std::borrow::Cow;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

use super::structures::*;

/// ZIP writer over any async sink.
pub struct ZipWriter<W: AsyncWrite + Unpin> {
    inner: W,
    method: CompressionMethod,
    offset: u64,
    central_directory: Vec<u8>,
    entries: u16,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    /// Create a writer that stores members with `method`.
    ///
    /// Only `Stored` and `Deflate` are accepted.
    pub fn new(inner: W, method: CompressionMethod) -> io::Result<Self> {
        if let CompressionMethod::Unknown(m) = method {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot write compression method {}", m),
            ));
        }
        Ok(Self {
            inner,
            method,
            offset: 0,
            central_directory: Vec::new(),
            entries: 0,
        })
    }

    /// Append one member.
    ///
    /// `name` is written byte for byte. The UTF-8 flag is set only when it is
    /// valid non-ASCII UTF-8, so names in a legacy code page keep their bytes.
    pub async fn add_entry(
        &mut self,
        name: impl AsRef<[u8]>,
        data: &[u8],
        modified: DosDateTime,
    ) -> io::Result<()> {
        let name = name.as_ref();
        if self.entries == u16::MAX {
            return Err(limit_error("more than 65535 members"));
        }
        if name.len() > u16::MAX as usize {
            return Err(limit_error("member name longer than 65535 bytes"));
        }
        if data.len() as u64 >= u32::MAX as u64 || self.offset >= u32::MAX as u64 {
            return Err(limit_error("member or archive larger than 4 GiB"));
        }

        let mut crc = Crc::new();
        crc.update(data);

        let (method, payload) = match self.method {
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                let compressed = encoder.finish()?;
                // Already-compressed images often grow under DEFLATE
                if compressed.len() < data.len() {
                    (CompressionMethod::Deflate, Cow::Owned(compressed))
                } else {
                    (CompressionMethod::Stored, Cow::Borrowed(data))
                }
            }
            _ => (CompressionMethod::Stored, Cow::Borrowed(data)),
        };

        let flags = if !name.is_ascii() && std::str::from_utf8(name).is_ok() {
            FLAG_UTF8
        } else {
            0
        };
        let header = MemberHeader {
            name,
            flags,
            method,
            modified,
            crc32: crc.sum(),
            compressed_size: payload.len() as u32,
            uncompressed_size: data.len() as u32,
        };

        let mut local = Vec::with_capacity(LFH_SIZE + name.len());
        header.write_local(&mut local)?;
        // AsyncWriteExt stays out of scope: Vec<u8> implements both Write
        // and AsyncWrite, so byteorder calls on the header buffers would clash
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, &local).await?;
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, &payload).await?;

        header.write_central(&mut self.central_directory, self.offset as u32)?;

        self.offset += (local.len() + payload.len()) as u64;
        self.entries += 1;
        Ok(())
    }

    /// Write the central directory and end record, returning the sink.
    pub async fn finish(mut self) -> io::Result<W> {
        let cd_size = self.central_directory.len() as u64;
        if self.offset + cd_size >= u32::MAX as u64 {
            return Err(limit_error("archive larger than 4 GiB"));
        }

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: self.entries,
            total_entries: self.entries,
            cd_size: cd_size as u32,
            cd_offset: self.offset as u32,
            comment_len: 0,
        };
        let mut tail = std::mem::take(&mut self.central_directory);
        eocd.write_to(&mut tail)?;

        tokio::io::AsyncWriteExt::write_all(&mut self.inner, &tail).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await?;
        Ok(self.inner)
    }
}

fn limit_error(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("ZIP limit exceeded: {}", what),
    )
}

struct MemberHeader<'a> {
    name: &'a [u8],
    flags: u16,
    method: CompressionMethod,
    modified: DosDateTime,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

impl MemberHeader<'_> {
    fn write_common(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.method.as_u16())?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size)?;
        out.write_u16::<LittleEndian>(self.name.len() as u16)?;
        out.write_u16::<LittleEndian>(0)?; // extra field length
        Ok(())
    }

    fn write_local(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.extend_from_slice(LFH_SIGNATURE);
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        self.write_common(out)?;
        out.extend_from_slice(self.name);
        Ok(())
    }

    fn write_central(&self, out: &mut Vec<u8>, lfh_offset: u32) -> io::Result<()> {
        out.extend_from_slice(CDFH_SIGNATURE);
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?; // version made by
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        self.write_common(out)?;
        out.write_u16::<LittleEndian>(0)?; // comment length
        out.write_u16::<LittleEndian>(0)?; // disk number start
        out.write_u16::<LittleEndian>(0)?; // internal attributes
        out.write_u32::<LittleEndian>(0)?; // external attributes
        out.write_u32::<LittleEndian>(lfh_offset)?;
        out.extend_from_slice(self.name);
        Ok(())
    }
}
