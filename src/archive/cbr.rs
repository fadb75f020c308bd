//! Rar-based archives via the external `unrar` utility.
//!
//! Listing uses the technical format (`unrar lt`), whose blocks look like:
//!
//! ```text
//!         Name: Saga 001/page01.jpg
//!         Type: File
//!         Size: 482113
//!        mtime: 2019-06-02 11:20:31,000000000
//! ```
//!
//! Solid archives can only be decompressed front to back, so the first
//! read extracts everything once (`unrar x`) into a private temporary
//! directory, and pages are then read from there.

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{ArchiveFormat, ComicArchive, Entry};
use crate::error::{Result, SplitError};
use crate::zip::DosDateTime;

/// One member block from `unrar lt` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarMember {
    pub name: String,
    pub size: u64,
    pub is_file: bool,
    pub modified: Option<DosDateTime>,
}

/// Parse `unrar lt` output into members, keeping archive order.
pub fn parse_technical_listing(output: &str) -> Vec<RarMember> {
    let mut members = Vec::new();
    let mut current: Option<RarMember> = None;

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(": ") else {
            continue;
        };

        match key {
            "Name" => {
                members.extend(current.take());
                current = Some(RarMember {
                    name: value.replace('\\', "/"),
                    size: 0,
                    is_file: false,
                    modified: None,
                });
            }
            "Type" => {
                if let Some(m) = current.as_mut() {
                    m.is_file = value == "File";
                }
            }
            "Size" => {
                if let Some(m) = current.as_mut() {
                    m.size = value.trim().parse().unwrap_or(0);
                }
            }
            "mtime" => {
                if let Some(m) = current.as_mut() {
                    m.modified = parse_mtime(value);
                }
            }
            _ => {}
        }
    }
    members.extend(current);

    members
}

/// `2019-06-02 11:20:31,000000000` to DOS time.
fn parse_mtime(value: &str) -> Option<DosDateTime> {
    let (date, time) = value.trim().split_once(' ')?;
    let mut d = date.split('-').map(|p| p.parse::<u16>().ok());
    let mut t = time
        .split(',')
        .next()?
        .split(':')
        .map(|p| p.parse::<u8>().ok());
    DosDateTime::from_parts(
        d.next()??,
        d.next()?? as u8,
        d.next()?? as u8,
        t.next()??,
        t.next()??,
        t.next()??,
    )
}

pub(super) struct CbrArchive {
    path: PathBuf,
    tool: PathBuf,
    entries: Vec<Entry>,
    // Removed on drop
    extracted: OnceCell<TempDir>,
}

impl CbrArchive {
    pub(super) async fn open(path: &Path, unrar: &OsStr) -> Result<Self> {
        // Resolve the tool before touching the archive
        let tool = which::which(unrar).map_err(|_| SplitError::MissingExternalTool {
            tool: unrar.to_string_lossy().into_owned(),
        })?;
        debug!(tool = %tool.display(), "using unrar");

        tokio::fs::metadata(path)
            .await
            .map_err(|e| SplitError::io(path, e))?;

        let output = Command::new(&tool)
            .args(["lt", "-c-", "-p-", "--"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SplitError::io(&tool, e))?;

        if !output.status.success() {
            return Err(SplitError::corrupt(
                path.display().to_string(),
                tool_failure("listing", &output),
            ));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let entries = parse_technical_listing(&listing)
            .into_iter()
            .filter(|m| m.is_file)
            .enumerate()
            .map(|(index, m)| Entry {
                name: m.name,
                raw_name: None,
                index,
                size: m.size,
                modified: m.modified.unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            tool,
            entries,
            extracted: OnceCell::new(),
        })
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }

    async fn extract_all(&self) -> Result<TempDir> {
        let dir = tempfile::Builder::new()
            .prefix("cbsplit-rar-")
            .tempdir()
            .map_err(|e| SplitError::io(std::env::temp_dir(), e))?;
        info!(archive = %self.path.display(), dir = %dir.path().display(), "extracting rar archive");

        // unrar wants a trailing separator on the destination
        let mut dest = dir.path().as_os_str().to_owned();
        dest.push(std::path::MAIN_SEPARATOR_STR);

        let output = Command::new(&self.tool)
            .args(["x", "-idq", "-y", "-c-", "-p-", "--"])
            .arg(&self.path)
            .arg(&dest)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SplitError::io(&self.tool, e))?;

        if !output.status.success() {
            return Err(SplitError::corrupt(self.label(), tool_failure("extraction", &output)));
        }
        Ok(dir)
    }
}

/// Where `name` lands under the extraction directory; `None` if it would
/// escape it.
fn extracted_path(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| root.join(relative))
}

#[async_trait]
impl ComicArchive for CbrArchive {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    fn entries(&self) -> &[Entry] {
        &self.entries
    }

    async fn read(&self, entry: &Entry) -> Result<Vec<u8>> {
        let dir = self.extracted.get_or_try_init(|| self.extract_all()).await?;

        let path = extracted_path(dir.path(), &entry.name).ok_or_else(|| {
            SplitError::corrupt(self.label(), format!("unsafe member path {:?}", entry.name))
        })?;
        let data = tokio::fs::read(&path).await.map_err(|e| {
            SplitError::corrupt(self.label(), format!("{} was not extracted: {}", entry.name, e))
        })?;

        if data.len() as u64 != entry.size {
            return Err(SplitError::corrupt(
                self.label(),
                format!(
                    "{}: extracted {} bytes, expected {}",
                    entry.name,
                    data.len(),
                    entry.size
                ),
            ));
        }
        debug!(name = %entry.name, path = %path.display(), "read extracted page");

        Ok(data)
    }
}

fn tool_failure(action: &str, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    match output.status.code() {
        Some(code) if detail.is_empty() => format!("unrar {} failed with exit code {}", action, code),
        Some(code) => format!("unrar {} failed with exit code {}: {}", action, code, detail),
        None => format!("unrar {} was terminated by a signal", action),
    }
}
