//! # cbsplit
//!
//! Split CBZ/CBR comic archives into a number of smaller CBZ parts.
//!
//! Pages keep their original order, names and bytes; each part holds a
//! contiguous run of pages and part sizes differ by at most one page. Output
//! is always zip-based (`.cbz`), whatever the source format.
//!
//! ## Features
//!
//! - Zip-based sources (`.cbz`/`.zip`), local or over HTTP Range requests
//! - Rar-based sources (`.cbr`/`.rar`) through the external `unrar` utility
//! - Mislabeled archives detected by signature
//! - Atomic part writes: a failed part never leaves a file behind
//! - Progress callback and cooperative cancellation for interactive callers
//!
//! ## Example
//!
//! ```no_run
//! use cbsplit::{CancelToken, OpenOptions, Source, SplitJob, run_split};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let job = SplitJob::new(Source::parse("Saga 001.cbz"), "out").with_parts(3);
//!
//!     let result = run_split(
//!         &job,
//!         &OpenOptions::default(),
//!         |fraction| println!("{:.0}%", fraction * 100.0),
//!         &CancelToken::new(),
//!     )
//!     .await
//!     .map_err(|failure| failure.error)?;
//!
//!     for path in &result.output_paths {
//!         println!("{}", path.display());
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod io;
pub mod split;
pub mod zip;

pub use archive::{ArchiveFormat, ComicArchive, Entry, OpenOptions, Source};
pub use cli::Cli;
pub use error::{Result, SplitError};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use split::{
    CancelToken, CollisionPolicy, JobFailure, JobResult, NamingTemplate, SplitJob, partition,
    run_split,
};
pub use zip::{ZipReader, ZipWriter};
