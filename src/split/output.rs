//! Output part files.
//!
//! A part is written to a hidden temporary file next to its final path and
//! renamed into place only once the archive is complete. Dropping a
//! [`PartWriter`] without calling [`PartWriter::commit`] deletes the
//! temporary file, so an interrupted part never leaves a valid-looking
//! archive behind.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::BufWriter;
use tracing::debug;

use crate::error::{Result, SplitError};
use crate::zip::{CompressionMethod, DosDateTime, ZipWriter};

/// What to do when an output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Fail with [`SplitError::NameCollision`].
    #[default]
    Fail,
    /// Replace the existing file.
    Overwrite,
}

/// Writes one output part.
pub struct PartWriter {
    target: PathBuf,
    temp: TempPath,
    collision: CollisionPolicy,
    zip: ZipWriter<BufWriter<File>>,
}

impl PartWriter {
    pub async fn create(
        target: &Path,
        collision: CollisionPolicy,
        compression: CompressionMethod,
    ) -> Result<Self> {
        if collision == CollisionPolicy::Fail
            && tokio::fs::try_exists(target)
                .await
                .map_err(|e| SplitError::io(target, e))?
        {
            return Err(SplitError::NameCollision(target.to_path_buf()));
        }

        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let (file, temp) = tempfile::Builder::new()
            .prefix(".cbsplit-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| SplitError::io(dir, e))?
            .into_parts();
        debug!(temp = %temp.display(), target = %target.display(), "writing part");

        let zip = ZipWriter::new(BufWriter::new(File::from_std(file)), compression)
            .map_err(|e| SplitError::io(target, e))?;

        Ok(Self {
            target: target.to_path_buf(),
            temp,
            collision,
            zip,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Append one member; `name` is stored byte for byte.
    pub async fn add(
        &mut self,
        name: impl AsRef<[u8]>,
        data: &[u8],
        modified: DosDateTime,
    ) -> Result<()> {
        self.zip
            .add_entry(name, data, modified)
            .await
            .map_err(|e| SplitError::io(&self.target, e))
    }

    /// Finish the archive and move it to its final path.
    pub async fn commit(self) -> Result<PathBuf> {
        let Self {
            target,
            temp,
            collision,
            zip,
        } = self;

        let file = zip
            .finish()
            .await
            .map_err(|e| SplitError::io(&target, e))?
            .into_inner();
        file.sync_all().await.map_err(|e| SplitError::io(&target, e))?;
        drop(file);

        let persisted = match collision {
            CollisionPolicy::Fail => temp.persist_noclobber(&target),
            CollisionPolicy::Overwrite => temp.persist(&target),
        };
        // On error the returned TempPath is dropped, which removes the file
        persisted.map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                SplitError::NameCollision(target.clone())
            } else {
                SplitError::io(&target, e.error)
            }
        })?;

        Ok(target)
    }
}

/// Write `entries` as a complete archive at `output_path`.
pub async fn write_archive<'a, I>(
    output_path: &Path,
    entries: I,
    collision: CollisionPolicy,
    compression: CompressionMethod,
) -> Result<PathBuf>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = PartWriter::create(output_path, collision, compression).await?;
    for (name, data) in entries {
        writer.add(name, data, DosDateTime::EPOCH).await?;
    }
    writer.commit().await
}
