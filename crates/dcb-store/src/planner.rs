//! The query planner: resolves a [`Query`] to an ordered position list.
//!
//! The cardinality-sort rule in [`intersect_by_cardinality`] is the single
//! most important correctness point in this module: a planner that sorts
//! the set list by size only to pick a pivot, then intersects in the
//! *original* order, silently re-introduces the larger set as the first
//! operand. Sorting must drive the actual sequential intersection order,
//! smallest set first, or a two-tag query can degrade into scanning the
//! larger set against itself.

use std::path::Path;

use dcb_core::{Position, Query, QueryItem, StoreError};

use crate::index::{event_type_index_path, read_positions, tag_index_path};

/// Resolves `query` against the indices rooted at `indices_root`, returning
/// a strictly ascending, deduplicated, `≤ last_sequence_position`-clamped
/// list of positions.
///
/// # Errors
///
/// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if an index
/// file cannot be read.
pub async fn plan(indices_root: &Path, query: &Query, last_sequence_position: Position) -> Result<Vec<Position>, StoreError> {
    let resolved = match query {
        Query::All => (1..=last_sequence_position.value()).map(Position::new).collect(),
        Query::FromEventTypes(types) => union_event_types(indices_root, types).await?,
        Query::FromTags(tags) => intersect_tags(indices_root, tags).await?,
        Query::FromItems(items) => {
            let mut unioned = Vec::new();
            for item in items {
                unioned.push(resolve_item(indices_root, item).await?);
            }
            union_sorted(unioned)
        }
    };

    Ok(clamp_and_dedup(resolved, last_sequence_position))
}

async fn resolve_item(indices_root: &Path, item: &QueryItem) -> Result<Vec<Position>, StoreError> {
    let types_side = if item.event_types.is_empty() {
        None
    } else {
        Some(union_event_types(indices_root, &item.event_types).await?)
    };
    let tags_side = if item.tags.is_empty() {
        None
    } else {
        Some(intersect_tags(indices_root, &item.tags).await?)
    };

    Ok(match (types_side, tags_side) {
        (Some(types), Some(tags)) => intersect_by_cardinality(vec![types, tags]),
        (Some(types), None) => types,
        (None, Some(tags)) => tags,
        (None, None) => Vec::new(),
    })
}

async fn union_event_types(indices_root: &Path, types: &[String]) -> Result<Vec<Position>, StoreError> {
    let mut sets = Vec::with_capacity(types.len());
    for event_type in types {
        sets.push(read_positions(&event_type_index_path(indices_root, event_type)).await?);
    }
    Ok(union_sorted(sets))
}

async fn intersect_tags(indices_root: &Path, tags: &[dcb_core::Tag]) -> Result<Vec<Position>, StoreError> {
    if tags.is_empty() {
        return Ok(Vec::new());
    }
    let mut sets = Vec::with_capacity(tags.len());
    for tag in tags {
        sets.push(read_positions(&tag_index_path(indices_root, tag)).await?);
    }
    Ok(intersect_by_cardinality(sets))
}

/// Merges pre-sorted sets into one sorted, deduplicated list.
fn union_sorted(sets: Vec<Vec<Position>>) -> Vec<Position> {
    let mut merged: Vec<Position> = sets.into_iter().flatten().collect();
    merged.sort_unstable();
    merged.dedup();
    merged
}

/// Intersects N pre-sorted sets, sorting the set list by cardinality
/// ascending *and using that sorted order to drive the sequential
/// intersection* — smallest set first, so each subsequent intersection
/// narrows against the smallest remaining candidate pool rather than
/// rescanning a large set.
fn intersect_by_cardinality(mut sets: Vec<Vec<Position>>) -> Vec<Position> {
    if sets.is_empty() {
        return Vec::new();
    }
    sets.sort_by_key(Vec::len);

    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut acc = first;
    for set in iter {
        acc = intersect_two(&acc, &set);
        if acc.is_empty() {
            break;
        }
    }
    acc
}

fn intersect_two(a: &[Position], b: &[Position]) -> Vec<Position> {
    let mut result = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                result.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result
}

fn clamp_and_dedup(mut positions: Vec<Position>, cap: Position) -> Vec<Position> {
    positions.retain(|p| *p <= cap);
    positions.sort_unstable();
    positions.dedup();
    positions
}
