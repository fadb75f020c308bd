use std::ops::Range;

use crate::error::{Result, SplitError};

/// A contiguous run of entry positions, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start: usize,
    pub end: usize,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// The partitions for one job plus the part count that was asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub partitions: Vec<Partition>,
    pub requested: usize,
}

impl Plan {
    /// Number of parts that will actually be written.
    pub fn effective(&self) -> usize {
        self.partitions.len()
    }

    /// True when fewer parts than requested will be written.
    pub fn is_clamped(&self) -> bool {
        self.effective() < self.requested
    }

    pub fn total_entries(&self) -> usize {
        self.partitions.last().map_or(0, |p| p.end)
    }
}

/// Split `total_count` entries into `part_count` balanced, contiguous runs.
///
/// The first `total_count % part_count` partitions get one extra entry.
/// Asking for more parts than there are entries yields one entry per part;
/// empty partitions are never produced.
pub fn partition(total_count: usize, part_count: usize) -> Result<Plan> {
    if total_count < 1 {
        return Err(SplitError::InvalidPartitionRequest(
            "archive contains no pages".to_string(),
        ));
    }
    if part_count < 1 {
        return Err(SplitError::InvalidPartitionRequest(
            "part count must be at least 1".to_string(),
        ));
    }

    let effective = part_count.min(total_count);
    let base = total_count / effective;
    let remainder = total_count % effective;

    let mut partitions = Vec::with_capacity(effective);
    let mut start = 0;
    for i in 0..effective {
        let len = base + usize::from(i < remainder);
        partitions.push(Partition {
            start,
            end: start + len,
        });
        start += len;
    }

    Ok(Plan {
        partitions,
        requested: part_count,
    })
}
