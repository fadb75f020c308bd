use async_trait::async_trait;
use std::sync::Arc;

use super::{ArchiveFormat, ComicArchive, Entry};
use crate::error::{Result, SplitError};
use crate::io::ReadAt;
use crate::zip::{ZipFileEntry, ZipReader};

/// Zip-based comic archive over any random-access source.
pub(super) struct CbzArchive<R: ReadAt> {
    label: String,
    reader: ZipReader<R>,
    entries: Vec<Entry>,
    // Parallel to `entries`
    members: Vec<ZipFileEntry>,
}

impl<R: ReadAt> CbzArchive<R> {
    pub(super) async fn open(source: Arc<R>, label: String) -> Result<Self> {
        let reader = ZipReader::new(source);
        let listing = reader
            .list_files()
            .await
            .map_err(|e| SplitError::corrupt(&label, format!("{e:#}")))?;

        let members: Vec<ZipFileEntry> = listing.into_iter().filter(|m| !m.is_directory).collect();
        let entries = members
            .iter()
            .enumerate()
            .map(|(index, m)| Entry {
                name: m.file_name.clone(),
                raw_name: m.raw_name.clone(),
                index,
                size: m.uncompressed_size,
                modified: m.modified,
            })
            .collect();

        Ok(Self {
            label,
            reader,
            entries,
            members,
        })
    }
}

#[async_trait]
impl<R: ReadAt + 'static> ComicArchive for CbzArchive<R> {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn entries(&self) -> &[Entry] {
        &self.entries
    }

    async fn read(&self, entry: &Entry) -> Result<Vec<u8>> {
        let member = self
            .members
            .get(entry.index)
            .filter(|m| m.file_name == entry.name)
            .ok_or_else(|| {
                SplitError::corrupt(&self.label, format!("no member {:?} at {}", entry.name, entry.index))
            })?;

        self.reader
            .read_to_memory(member)
            .await
            .map_err(|e| SplitError::corrupt(&self.label, format!("{e:#}")))
    }
}
