use std::cmp::Ordering;
use std::fmt;

/// Identifies a single storage page across every cache group.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FullPageId {
    /// Cache group the page belongs to.
    pub group_id: i32,
    /// Partition within the group.
    pub partition_id: i32,
    /// Page index within the partition file.
    pub page_idx: i64,
}

impl FullPageId {
    /// Creates a page identifier from its components.
    pub const fn new(group_id: i32, partition_id: i32, page_idx: i64) -> Self {
        Self {
            group_id,
            partition_id,
            page_idx,
        }
    }

    /// Returns the partition this page lives in.
    pub const fn partition(&self) -> PartitionId {
        PartitionId {
            group_id: self.group_id,
            partition_id: self.partition_id,
        }
    }
}

impl Ord for FullPageId {
    fn cmp(&self, other: &Self) -> Ordering {
        sequential_page_order(self, other)
    }
}

impl PartialOrd for FullPageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FullPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.group_id, self.partition_id, self.page_idx
        )
    }
}

impl From<(i32, i32, i64)> for FullPageId {
    fn from((group_id, partition_id, page_idx): (i32, i32, i64)) -> Self {
        Self::new(group_id, partition_id, page_idx)
    }
}

/// Order in which checkpoint pages hit the device.
///
/// Compares group id, then partition id, then page index, all ascending, so a
/// sorted run of pages walks each partition file front to back.
pub fn sequential_page_order(a: &FullPageId, b: &FullPageId) -> Ordering {
    a.group_id
        .cmp(&b.group_id)
        .then(a.partition_id.cmp(&b.partition_id))
        .then(a.page_idx.cmp(&b.page_idx))
}

/// A (group, partition) pair; one partition file on disk.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PartitionId {
    /// Cache group id.
    pub group_id: i32,
    /// Partition id within the group.
    pub partition_id: i32,
}

impl PartitionId {
    /// Creates a partition identifier.
    pub const fn new(group_id: i32, partition_id: i32) -> Self {
        Self {
            group_id,
            partition_id,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.partition_id)
    }
}
