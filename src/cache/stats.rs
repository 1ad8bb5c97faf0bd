//! Cache Statistics

use std::fmt;

/// Point-in-time view of tier occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Keys in the index
    pub entry_count: usize,
    /// Entries on the heap
    pub heap_count: usize,
    /// Entries in off-heap pages
    pub off_heap_count: usize,
    /// Records in the backing store
    pub disk_count: u64,
    /// Off-heap bytes owned by entries
    pub used_memory: usize,
    /// Bytes across allocated pages
    pub page_capacity: usize,
    /// Allocated pages
    pub page_count: usize,
    /// Free slots in the index
    pub free_slot_count: usize,
    /// Smallest free slot
    pub free_slot_min: Option<usize>,
    /// Largest free slot
    pub free_slot_max: Option<usize>,
    /// Configured heap entries limit
    pub entries_limit: Option<usize>,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limit = self
            .entries_limit
            .map_or_else(|| "unbounded".to_string(), |l| l.to_string());
        let size = |s: Option<usize>| s.map_or_else(|| "-".to_string(), |s| s.to_string());

        writeln!(f, "cache stats {{")?;
        writeln!(f, "   entries: {}", self.entry_count)?;
        writeln!(f, "   heap: {}/{}", self.heap_count, limit)?;
        writeln!(f, "   memory: {}/{}", self.used_memory, self.page_capacity)?;
        writeln!(
            f,
            "   in {} off-heap and {} on disk entries",
            self.off_heap_count, self.disk_count
        )?;
        writeln!(
            f,
            "   free slots: {} first size is: {} last size={}",
            self.free_slot_count,
            size(self.free_slot_min),
            size(self.free_slot_max)
        )?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let stats = CacheStats {
            entry_count: 3,
            heap_count: 1,
            off_heap_count: 1,
            disk_count: 1,
            used_memory: 400,
            page_capacity: 1024,
            page_count: 1,
            free_slot_count: 2,
            free_slot_min: Some(224),
            free_slot_max: Some(400),
            entries_limit: Some(1),
        };
        let text = stats.to_string();
        assert!(text.contains("heap: 1/1"));
        assert!(text.contains("memory: 400/1024"));
        assert!(text.contains("in 1 off-heap and 1 on disk entries"));
        assert!(text.contains("free slots: 2 first size is: 224 last size=400"));
    }

    #[test]
    fn test_display_empty() {
        let stats = CacheStats {
            entry_count: 0,
            heap_count: 0,
            off_heap_count: 0,
            disk_count: 0,
            used_memory: 0,
            page_capacity: 0,
            page_count: 0,
            free_slot_count: 0,
            free_slot_min: None,
            free_slot_max: None,
            entries_limit: None,
        };
        let text = stats.to_string();
        assert!(text.contains("heap: 0/unbounded"));
        assert!(text.contains("first size is: - last size=-"));
    }
}
