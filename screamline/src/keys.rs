use crate::types::Collection;

/// Redis key construction shared by the store and the event stream consumer.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
    pub service: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str, service: &'a str) -> Self {
        Self { prefix, service }
    }

    pub fn document(&self, collection: Collection, id: &str) -> String {
        format!("{}:{}:{}:{}", self.prefix, self.service, collection, id)
    }

    /// Scan pattern matching every document of a collection (and its index keys).
    pub fn collection_pattern(&self, collection: Collection) -> String {
        format!("{}:{}:{}:*", self.prefix, self.service, collection)
    }

    /// Prefix shared by all equality-index sets of a collection.
    pub fn index_prefix(&self, collection: Collection) -> String {
        format!("{}:{}:{}:idx:", self.prefix, self.service, collection)
    }

    /// Set holding the ids of documents whose `field` equals `token`.
    /// Format: prefix:service:collection:idx:field:token
    pub fn index(&self, collection: Collection, field: &str, token: &str) -> String {
        format!("{}{}:{}", self.index_prefix(collection), field, token)
    }

    /// Stream receiving one entry per committed document change.
    pub fn events(&self) -> String {
        format!("{}:{}:events", self.prefix, self.service)
    }
}
