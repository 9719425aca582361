use crate::types::Record;

/// Receives live-query change events.
///
/// Callbacks run synchronously on the writing thread, after the cache entry
/// lock was released. Records are passed without relationship slots.
pub trait QueryListener: Send + Sync {
    /// `record` started matching the query.
    fn on_item_added(&self, record: &Record);

    /// `record` matched before the write and still matches.
    fn on_item_updated(&self, record: &Record);

    /// `record` stopped matching, or was deleted.
    fn on_item_removed(&self, record: &Record);
}
