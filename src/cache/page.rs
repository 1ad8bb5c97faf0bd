//! Page Pool - Fixed-Size Off-Heap Regions
//!
//! Pages are allocated lazily up to a configured maximum and are never
//! resized or freed while the cache lives. Entries and free slots only
//! reference a page by [`PageId`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Identifier of a page inside its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// A byte range inside a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabRange {
    /// Owning page
    pub page: PageId,
    /// Start offset within the page
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

impl SlabRange {
    /// Create a new range
    pub fn new(page: PageId, offset: usize, len: usize) -> Self {
        Self { page, offset, len }
    }

    /// Exclusive end offset
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// True if both ranges share at least one byte
    pub fn overlaps(&self, other: &SlabRange) -> bool {
        self.page == other.page && self.offset < other.end() && other.offset < self.end()
    }

    /// Split into the first `len` bytes and the remainder
    ///
    /// `len` must not exceed `self.len`.
    pub fn split_at(&self, len: usize) -> (SlabRange, SlabRange) {
        debug_assert!(len <= self.len);
        (
            SlabRange::new(self.page, self.offset, len),
            SlabRange::new(self.page, self.offset + len, self.len - len),
        )
    }
}

impl fmt::Display for SlabRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{}]", self.page, self.offset, self.end())
    }
}

/// One raw byte region
pub struct Page {
    id: PageId,
    data: RwLock<Box<[u8]>>,
}

impl Page {
    fn new(id: PageId, size: usize) -> Self {
        Self {
            id,
            data: RwLock::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    /// Page identifier
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Page size in bytes
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True for a zero-sized page
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full extent of the page as a range
    pub fn extent(&self) -> SlabRange {
        SlabRange::new(self.id, 0, self.len())
    }

    fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.write();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let data = self.data.read();
        data[offset..offset + len].to_vec()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Bounded set of pages
pub struct PagePool {
    page_size: usize,
    max_pages: usize,
    pages: RwLock<Vec<Arc<Page>>>,
}

impl PagePool {
    /// Create an empty pool; no page is allocated yet
    pub fn new(page_size: usize, max_pages: usize) -> Self {
        Self {
            page_size,
            max_pages,
            pages: RwLock::new(Vec::new()),
        }
    }

    /// Allocate one more page, or `None` once `max_pages` is reached
    pub fn allocate(&self) -> Option<Arc<Page>> {
        let mut pages = self.pages.write();
        if pages.len() >= self.max_pages {
            debug!(max_pages = self.max_pages, "no memory pages left");
            return None;
        }
        let id = PageId(pages.len() as u32);
        let page = Arc::new(Page::new(id, self.page_size));
        pages.push(page.clone());
        info!(page = %id, size = self.page_size, "allocated a new memory page");
        Some(page)
    }

    /// Look up a page
    pub fn page(&self, id: PageId) -> Option<Arc<Page>> {
        self.pages.read().get(id.0 as usize).cloned()
    }

    /// Copy `bytes` into the start of `range`
    pub fn write(&self, range: SlabRange, bytes: &[u8]) -> Result<()> {
        if bytes.len() > range.len {
            return Err(Error::Internal(format!(
                "write of {} bytes exceeds granted range {}",
                bytes.len(),
                range
            )));
        }
        self.checked_page(range)?.write(range.offset, bytes);
        Ok(())
    }

    /// Copy the bytes of `range` out of its page
    pub fn read(&self, range: SlabRange) -> Result<Vec<u8>> {
        Ok(self.checked_page(range)?.read(range.offset, range.len))
    }

    fn checked_page(&self, range: SlabRange) -> Result<Arc<Page>> {
        match self.page(range.page) {
            Some(page) if range.end() <= page.len() => Ok(page),
            _ => Err(Error::Internal(format!("range {} is outside the page pool", range))),
        }
    }

    /// Full extents of every allocated page
    pub fn extents(&self) -> Vec<SlabRange> {
        self.pages.read().iter().map(|p| p.extent()).collect()
    }

    /// Number of allocated pages
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// Configured page size
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Configured page limit
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Bytes across allocated pages
    pub fn capacity(&self) -> usize {
        self.page_count() * self.page_size
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocates_up_to_max() {
        let pool = PagePool::new(1024, 2);
        assert_eq!(pool.page_count(), 0);

        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();
        assert_eq!(first.id(), PageId(0));
        assert_eq!(second.id(), PageId(1));
        assert!(pool.allocate().is_none());
        assert_eq!(pool.capacity(), 2048);
    }

    #[test]
    fn test_large_page_limit_grows_lazily() {
        let pool = PagePool::new(64, u32::MAX as usize);
        assert_eq!(pool.page_count(), 0);

        let page = pool.allocate().unwrap();
        assert_eq!(page.id(), PageId(0));
        assert_eq!(pool.page_count(), 1);
        assert_eq!(pool.extents(), vec![SlabRange::new(PageId(0), 0, 64)]);
    }

    #[test]
    fn test_write_then_read_range() {
        let pool = PagePool::new(64, 1);
        let page = pool.allocate().unwrap();
        let range = SlabRange::new(page.id(), 10, 5);

        pool.write(range, b"hello").unwrap();
        assert_eq!(pool.read(range).unwrap(), b"hello");
        assert_eq!(pool.read(SlabRange::new(page.id(), 0, 10)).unwrap(), vec![0u8; 10]);
    }

    #[test]
    fn test_out_of_pool_range_rejected() {
        let pool = PagePool::new(64, 1);
        pool.allocate().unwrap();

        assert!(pool.read(SlabRange::new(PageId(1), 0, 4)).is_err());
        assert!(pool.read(SlabRange::new(PageId(0), 60, 8)).is_err());
        assert!(pool
            .write(SlabRange::new(PageId(0), 0, 2), b"too long")
            .is_err());
    }

    #[test]
    fn test_range_overlap() {
        let a = SlabRange::new(PageId(0), 0, 100);
        let b = SlabRange::new(PageId(0), 99, 10);
        let c = SlabRange::new(PageId(0), 100, 10);
        let d = SlabRange::new(PageId(1), 0, 100);

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!a.overlaps(&d));
    }

    #[test]
    fn test_range_split() {
        let range = SlabRange::new(PageId(3), 100, 50);
        let (head, rest) = range.split_at(20);
        assert_eq!(head, SlabRange::new(PageId(3), 100, 20));
        assert_eq!(rest, SlabRange::new(PageId(3), 120, 30));
        assert_eq!(format!("{}", head), "page#3[100..120]");
    }
}
