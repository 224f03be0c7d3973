//! Ordered poll list with a forward-only cursor.

use crate::error::{PollError, Result};
use crate::item::PollItem;

/// The items of one polling pass and the position within it.
///
/// A pass is a single forward traversal: the cursor never wraps. Reaching
/// the last item and succeeding on it is what ends a pass.
#[derive(Debug, Clone, Default)]
pub struct PollList {
    pool: Vec<PollItem>,
    cursor: usize,
}

impl PollList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pool and rewind the cursor.
    ///
    /// An empty list is rejected and the current pool is kept.
    pub fn install(&mut self, items: Vec<PollItem>) -> Result<()> {
        if items.is_empty() {
            return Err(PollError::config("Poll list must contain at least one item"));
        }
        self.pool = items;
        self.cursor = 0;
        Ok(())
    }

    /// Item under the cursor.
    pub fn current(&self) -> Option<&PollItem> {
        self.pool.get(self.cursor)
    }

    /// Step to the next item.
    ///
    /// Returns `None` and leaves the cursor alone when already on the last item.
    pub fn advance(&mut self) -> Option<&PollItem> {
        if self.is_last_item() || self.pool.is_empty() {
            return None;
        }
        self.cursor += 1;
        self.pool.get(self.cursor)
    }

    /// True iff the cursor sits on the final item.
    pub fn is_last_item(&self) -> bool {
        !self.pool.is_empty() && self.cursor == self.pool.len() - 1
    }

    /// Rewind to the first item.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn items(&self) -> &[PollItem] {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: u16) -> Vec<PollItem> {
        (0..n).map(|address| PollItem::read("FC3", address, 1)).collect()
    }

    #[test]
    fn test_install_rejects_empty() {
        let mut list = PollList::new();
        list.install(items(2)).unwrap();

        assert!(list.install(Vec::new()).is_err());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_single_forward_traversal() {
        let mut list = PollList::new();
        list.install(items(3)).unwrap();

        let mut visited = vec![list.current().unwrap().address];
        while !list.is_last_item() {
            visited.push(list.advance().unwrap().address);
        }

        assert_eq!(visited, vec![0, 1, 2]);
        assert_eq!(list.cursor(), 2);
        assert!(list.advance().is_none());
        assert_eq!(list.cursor(), 2);
    }

    #[test]
    fn test_install_resets_cursor() {
        let mut list = PollList::new();
        list.install(items(3)).unwrap();
        list.advance();
        list.advance();

        list.install(items(2)).unwrap();
        assert_eq!(list.cursor(), 0);
        assert!(!list.is_last_item());
    }

    #[test]
    fn test_single_item_is_last() {
        let mut list = PollList::new();
        assert!(!list.is_last_item());
        assert!(list.current().is_none());

        list.install(items(1)).unwrap();
        assert!(list.is_last_item());
    }
}
