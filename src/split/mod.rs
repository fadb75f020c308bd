//! Splitting a source archive into CBZ parts.
//!
//! [`run_split`] drives the whole pipeline: open the source, compute a
//! [`Plan`] with [`partition`], then write each part through a
//! [`PartWriter`], reporting progress to the caller along the way.

mod job;
mod naming;
mod output;
mod plan;

pub use job::{
    CancelToken, DEFAULT_PARTS, JobFailure, JobResult, JobState, SplitJob, run_split,
};
pub use naming::{NamingTemplate, OUTPUT_EXTENSION};
pub use output::{CollisionPolicy, PartWriter, write_archive};
pub use plan::{Partition, Plan, partition};
