//! Source comic archives.
//!
//! [`open`] turns a [`Source`] into a [`ComicArchive`]: the member list in
//! native directory order plus random-access reads. Zip-based archives
//! (`.cbz`/`.zip`) are parsed directly; rar-based archives (`.cbr`/`.rar`)
//! go through the external `unrar` utility, which is located once when the
//! archive is opened.

mod cbr;
mod cbz;

pub use cbr::{RarMember, parse_technical_listing};

use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::{Result, SplitError};
use crate::io::{HttpRangeReader, LocalFileReader};
use crate::zip::DosDateTime;

/// Container format of a source archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
}

impl ArchiveFormat {
    /// Format implied by a file name's extension, case-insensitive.
    pub fn from_extension(file_name: &str) -> Option<Self> {
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "cbz" | "zip" => Some(ArchiveFormat::Zip),
            "cbr" | "rar" => Some(ArchiveFormat::Rar),
            _ => None,
        }
    }

    /// Format named by the leading signature bytes, if recognisable.
    pub fn sniff(magic: &[u8]) -> Option<Self> {
        if magic.starts_with(b"PK\x03\x04") || magic.starts_with(b"PK\x05\x06") {
            Some(ArchiveFormat::Zip)
        } else if magic.starts_with(b"Rar!\x1a\x07") {
            Some(ArchiveFormat::Rar)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => f.write_str("zip"),
            ArchiveFormat::Rar => f.write_str("rar"),
        }
    }
}

/// Where a source archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    /// `http://` or `https://` URL; zip-based archives only.
    Remote(String),
}

impl Source {
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Source::Remote(s.to_string())
        } else {
            Source::Local(PathBuf::from(s))
        }
    }

    /// Last path component, without any URL query or fragment.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Source::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Source::Remote(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.rsplit('/')
                    .next()
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
            }
        }
    }

    /// File name with its extension removed.
    pub fn stem(&self) -> Option<String> {
        let name = self.file_name()?;
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => Some(stem.to_string()),
            _ => Some(name),
        }
    }

    /// Directory holding a local source.
    pub fn parent_dir(&self) -> Option<&Path> {
        match self {
            Source::Local(path) => path.parent(),
            Source::Remote(_) => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Remote(url) => f.write_str(url),
        }
    }
}

/// One page (or other file) inside a source archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path inside the archive, `/`-separated.
    pub name: String,
    /// Stored name bytes when they are not UTF-8 and `name` is only a lossy
    /// rendering of them.
    pub raw_name: Option<Vec<u8>>,
    /// Position in the archive's directory, counting files only.
    pub index: usize,
    /// Uncompressed size in bytes.
    pub size: u64,
    pub modified: DosDateTime,
}

impl Entry {
    /// Name bytes to write into an output archive.
    pub fn stored_name(&self) -> &[u8] {
        self.raw_name.as_deref().unwrap_or(self.name.as_bytes())
    }
}

/// Options that affect how sources are opened.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Program name or path of the unrar utility.
    pub unrar: OsString,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            unrar: OsString::from("unrar"),
        }
    }
}

/// An opened source archive.
///
/// Any file handle is released when the value is dropped.
#[async_trait]
pub trait ComicArchive: Send + Sync {
    fn format(&self) -> ArchiveFormat;

    /// Members in native directory order. Directories are not listed.
    fn entries(&self) -> &[Entry];

    /// Read the uncompressed bytes of `entry`. Entries may be read in any order.
    async fn read(&self, entry: &Entry) -> Result<Vec<u8>>;
}

/// Open a source archive and list its entries.
///
/// Fails with [`SplitError::UnsupportedFormat`] before touching the file
/// system when the extension is not recognised, and with
/// [`SplitError::MissingExternalTool`] before reading any bytes when a
/// rar-based archive needs an unrar that cannot be found.
pub async fn open(source: &Source, options: &OpenOptions) -> Result<Box<dyn ComicArchive>> {
    let file_name = source.file_name().unwrap_or_default();
    let by_extension = ArchiveFormat::from_extension(&file_name)
        .ok_or_else(|| SplitError::UnsupportedFormat(source.to_string()))?;

    match source {
        Source::Remote(url) => {
            if by_extension == ArchiveFormat::Rar {
                return Err(SplitError::UnsupportedFormat(format!(
                    "{} (rar-based archives must be local files)",
                    url
                )));
            }
            let reader = HttpRangeReader::new(url.clone())
                .await
                .map_err(|e| SplitError::io(url, std::io::Error::other(format!("{e:#}"))))?;
            let archive = cbz::CbzArchive::open(Arc::new(reader), url.clone()).await?;
            Ok(Box::new(archive))
        }
        Source::Local(path) => {
            let format = match sniff_file(path).await {
                Some(sniffed) if sniffed != by_extension => {
                    warn!(
                        path = %path.display(),
                        extension = %by_extension,
                        signature = %sniffed,
                        "archive extension does not match its contents, using signature"
                    );
                    sniffed
                }
                _ => by_extension,
            };
            debug!(path = %path.display(), %format, "opening source archive");

            match format {
                ArchiveFormat::Zip => {
                    let reader = LocalFileReader::new(path)
                        .map_err(|e| SplitError::from_anyhow(path, e))?;
                    let archive =
                        cbz::CbzArchive::open(Arc::new(reader), path.display().to_string()).await?;
                    Ok(Box::new(archive))
                }
                ArchiveFormat::Rar => {
                    let archive = cbr::CbrArchive::open(path, &options.unrar).await?;
                    Ok(Box::new(archive))
                }
            }
        }
    }
}

/// Read the first bytes of a local file; `None` if unreadable or unknown.
async fn sniff_file(path: &Path) -> Option<ArchiveFormat> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut magic = [0u8; 8];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    ArchiveFormat::sniff(&magic[..filled])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ArchiveFormat::from_extension("a.cbz"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_extension("A.CBR"), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::from_extension("x.Zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_extension("x.rar"), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::from_extension("x.cb7"), None);
        assert_eq!(ArchiveFormat::from_extension("cbz"), None);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(ArchiveFormat::sniff(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(b"Rar!\x1a\x07\x01\x00"), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::sniff(b"\x89PNG"), None);
        assert_eq!(ArchiveFormat::sniff(b""), None);
    }

    #[test]
    fn test_source_names() {
        let local = Source::parse("/comics/Saga 001.cbz");
        assert_eq!(local.file_name().as_deref(), Some("Saga 001.cbz"));
        assert_eq!(local.stem().as_deref(), Some("Saga 001"));
        assert_eq!(local.parent_dir(), Some(Path::new("/comics")));

        let remote = Source::parse("https://example.com/dl/Saga%20001.cbz?token=abc");
        assert!(matches!(remote, Source::Remote(_)));
        assert_eq!(remote.file_name().as_deref(), Some("Saga%20001.cbz"));
        assert_eq!(remote.parent_dir(), None);
    }

    #[tokio::test]
    async fn test_unknown_extension_is_rejected() {
        let err = open(&Source::parse("/nonexistent/comic.pdf"), &OpenOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SplitError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_remote_rar_is_rejected() {
        let err = open(
            &Source::parse("https://example.com/comic.cbr"),
            &OpenOptions::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SplitError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_missing_local_file_is_io_error() {
        let err = open(&Source::parse("/nonexistent/comic.cbz"), &OpenOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SplitError::Io { .. }));
    }
}
