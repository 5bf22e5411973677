//! The `Query` language the planner resolves to a position list.
//!
//! A query is either `All`, a union of event types, a conjunction of tags,
//! or an arbitrary disjunction of `(types ∩ tags)` items.

use crate::tag::Tag;

/// One disjunct of a [`Query::FromItems`] query: a conjunction of an
/// event-type set and a tag set. Either side may be empty, meaning "no
/// constraint on this axis" (the universe).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryItem {
    /// Event types this item requires (empty = no constraint).
    pub event_types: Vec<String>,
    /// Tags this item requires (empty = no constraint).
    pub tags: Vec<Tag>,
}

impl QueryItem {
    /// Builds an item matching only the given event types.
    #[must_use]
    pub fn from_event_types(event_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            event_types: event_types.into_iter().map(Into::into).collect(),
            tags: Vec::new(),
        }
    }

    /// Builds an item matching only the given tags.
    #[must_use]
    pub fn from_tags(tags: impl IntoIterator<Item = Tag>) -> Self {
        Self {
            event_types: Vec::new(),
            tags: tags.into_iter().collect(),
        }
    }

    /// Adds an event-type constraint, consuming and returning `self`.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    /// Adds a tag constraint, consuming and returning `self`.
    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }
}

/// A query over the event log or a projection's tag indices.
///
/// Semantics: `All` matches every event; `FromEventTypes` is a union
/// across the given types' index files; `FromTags` is an intersection
/// across the given tags' index files; `FromItems` is the union of each
/// item's `(types ∩ tags)` result, with an absent side of an item meaning
/// "no constraint" rather than "empty".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Matches every event.
    All,
    /// Union of the event-type index for each named type.
    FromEventTypes(Vec<String>),
    /// Intersection of the tag index for each given tag.
    FromTags(Vec<Tag>),
    /// Union of `(types ∩ tags)` across each item.
    FromItems(Vec<QueryItem>),
}

impl Query {
    /// Builds a [`Query::FromTags`] from a single tag, a common case for
    /// DCB uniqueness checks.
    #[must_use]
    pub fn from_tag(tag: Tag) -> Self {
        Self::FromTags(vec![tag])
    }
}

/// Options controlling how [`crate::event::SequencedEvent`]s are returned
/// from a read.
///
/// `limit` and `after_position` are extensions beyond the base read model;
/// both preserve the ascending default unless a caller opts into descending
/// order explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// If `true`, results are returned newest-first; otherwise oldest-first.
    pub descending: bool,
    /// Caps the number of events returned.
    pub limit: Option<usize>,
    /// Restricts results to positions strictly after this one.
    pub after_position: Option<crate::position::Position>,
}

impl ReadOptions {
    /// The default ascending, unbounded read.
    #[must_use]
    pub const fn ascending() -> Self {
        Self { descending: false, limit: None, after_position: None }
    }

    /// A descending, unbounded read.
    #[must_use]
    pub const fn descending() -> Self {
        Self { descending: true, limit: None, after_position: None }
    }

    /// Sets the result limit, consuming and returning `self`.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the lower position bound, consuming and returning `self`.
    #[must_use]
    pub const fn with_after_position(mut self, position: crate::position::Position) -> Self {
        self.after_position = Some(position);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_item_builder_accumulates_constraints() {
        let item = QueryItem::default()
            .with_event_type("UserRegistered.v1")
            .with_tag(Tag::new("email", "a@x"));
        assert_eq!(item.event_types, vec!["UserRegistered.v1".to_string()]);
        assert_eq!(item.tags, vec![Tag::new("email", "a@x")]);
    }

    #[test]
    fn read_options_defaults_to_ascending_unbounded() {
        let options = ReadOptions::default();
        assert!(!options.descending);
        assert_eq!(options.limit, None);
    }
}
