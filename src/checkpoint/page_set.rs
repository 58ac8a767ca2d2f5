use std::collections::hash_set;
use std::collections::HashSet;

use crate::types::{sequential_page_order, FullPageId};

/// Pages dirtied since the previous checkpoint.
///
/// Set semantics: inserting a page twice keeps one copy. The set is never
/// reordered in place; [`to_ordered_array`](Self::to_ordered_array) returns a
/// fresh sorted copy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageSet {
    pages: HashSet<FullPageId>,
}

impl PageSet {
    /// Creates an empty page set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty page set with room for `capacity` pages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pages: HashSet::with_capacity(capacity),
        }
    }

    /// Merges several per-region collections into one set.
    pub fn from_collections<I, C>(collections: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = FullPageId>,
    {
        let mut set = Self::new();
        for collection in collections {
            set.extend(collection);
        }
        set
    }

    /// Adds a page; returns `false` if it was already present.
    pub fn insert(&mut self, page: FullPageId) -> bool {
        self.pages.insert(page)
    }

    /// Whether `page` is part of the set.
    pub fn contains(&self, page: &FullPageId) -> bool {
        self.pages.contains(page)
    }

    /// Number of distinct pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the set holds no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Iterates pages in no particular order.
    pub fn iter(&self) -> hash_set::Iter<'_, FullPageId> {
        self.pages.iter()
    }

    /// Copies the pages out in no particular order.
    pub fn to_array(&self) -> Vec<FullPageId> {
        self.pages.iter().copied().collect()
    }

    /// Copies the pages out sorted by [`sequential_page_order`].
    pub fn to_ordered_array(&self) -> Vec<FullPageId> {
        let mut pages = self.to_array();
        pages.sort_unstable_by(sequential_page_order);
        pages
    }
}

impl Extend<FullPageId> for PageSet {
    fn extend<T: IntoIterator<Item = FullPageId>>(&mut self, iter: T) {
        self.pages.extend(iter);
    }
}

impl FromIterator<FullPageId> for PageSet {
    fn from_iter<T: IntoIterator<Item = FullPageId>>(iter: T) -> Self {
        Self {
            pages: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PageSet {
    type Item = &'a FullPageId;
    type IntoIter = hash_set::Iter<'a, FullPageId>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
