use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::types::{PenumbraError, Record, RelationshipReference, Result};

use super::engine::RelationshipEngine;

/// Deferred to-many collection over a snapshot of the stored reference set.
///
/// Records are materialized one page at a time on first access and kept for
/// the lifetime of the list (clones share loaded pages). Iteration is
/// restartable: every call to [`LazyRelationshipList::iter`] starts at the
/// first element. Elements follow the stored set's order.
#[derive(Clone)]
pub struct LazyRelationshipList {
    engine: RelationshipEngine,
    parent: RelationshipReference,
    references: Arc<[RelationshipReference]>,
    page_size: usize,
    pages: Arc<Mutex<FxHashMap<usize, Arc<[Record]>>>>,
}

impl LazyRelationshipList {
    pub(crate) fn new(
        engine: RelationshipEngine,
        parent: RelationshipReference,
        references: Vec<RelationshipReference>,
        page_size: usize,
    ) -> Self {
        Self {
            engine,
            parent,
            references: references.into(),
            page_size: page_size.max(1),
            pages: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// True if the collection has no children.
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Endpoints backing the collection.
    pub fn references(&self) -> &[RelationshipReference] {
        &self.references
    }

    /// Number of pages materialized so far.
    pub fn loaded_pages(&self) -> usize {
        self.pages.lock().len()
    }

    /// Child at `index`, loading its page if needed.
    pub fn get(&self, index: usize) -> Result<Record> {
        if index >= self.references.len() {
            return Err(PenumbraError::Invalid("lazy collection index out of bounds"));
        }
        let page = self.page(index / self.page_size)?;
        page.get(index % self.page_size)
            .cloned()
            .ok_or(PenumbraError::Invalid("lazy collection index out of bounds"))
    }

    /// Iterates from the first element.
    pub fn iter(&self) -> LazyIter<'_> {
        LazyIter {
            list: self,
            index: 0,
        }
    }

    /// Materializes every element.
    pub fn load_all(&self) -> Result<Vec<Record>> {
        self.iter().collect()
    }

    fn page(&self, number: usize) -> Result<Arc<[Record]>> {
        if let Some(page) = self.pages.lock().get(&number) {
            return Ok(Arc::clone(page));
        }
        // Loaded without holding the page lock; a concurrent load of the same
        // page is harmless, the first insert wins.
        let start = number * self.page_size;
        let end = (start + self.page_size).min(self.references.len());
        let mut records = Vec::with_capacity(end - start);
        for endpoint in &self.references[start..end] {
            records.push(self.engine.load_child(&self.parent, endpoint)?);
        }
        let page: Arc<[Record]> = records.into();
        let mut pages = self.pages.lock();
        Ok(Arc::clone(pages.entry(number).or_insert(page)))
    }
}

impl fmt::Debug for LazyRelationshipList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRelationshipList")
            .field("parent", &self.parent)
            .field("len", &self.references.len())
            .field("page_size", &self.page_size)
            .field("loaded_pages", &self.loaded_pages())
            .finish()
    }
}

impl PartialEq for LazyRelationshipList {
    fn eq(&self, other: &Self) -> bool {
        self.parent == other.parent && self.references == other.references
    }
}

/// Restartable iterator over a [`LazyRelationshipList`].
pub struct LazyIter<'a> {
    list: &'a LazyRelationshipList,
    index: usize,
}

impl Iterator for LazyIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.list.len() {
            return None;
        }
        let item = self.list.get(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LazyIter<'_> {}
