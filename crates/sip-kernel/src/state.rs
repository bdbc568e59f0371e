//! Per-run write-once blackboard.
//!
//! Every field has at most one writer. Stages that can run concurrently are
//! guaranteed disjoint write sets by [`StageGraphBuilder`](crate::graph::StageGraphBuilder),
//! so the store needs no lock beyond the per-shard one inside [`DashMap`].
//! A racing second write to the same key is still caught by the entry API and
//! rejected, never applied.

use crate::error::StateError;
use crate::types::{FieldKey, FieldValue, StageId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
struct Slot {
    value: FieldValue,
    writer: StageId,
}

/// Write-once field store for a single run
#[derive(Debug, Default)]
pub struct StateStore {
    fields: DashMap<FieldKey, Slot>,
    optional: HashSet<FieldKey>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store where reads of the given absent keys yield the empty sentinel.
    pub fn with_optional(keys: impl IntoIterator<Item = FieldKey>) -> Self {
        Self {
            fields: DashMap::new(),
            optional: keys.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_optional(&self, key: &FieldKey) -> bool {
        self.optional.contains(key)
    }

    /// Write a field.
    ///
    /// # Errors
    /// `StateError::DuplicateWrite` if the key is already present, whatever the value.
    pub fn put(&self, key: FieldKey, value: FieldValue, writer: &StageId) -> Result<(), StateError> {
        match self.fields.entry(key) {
            Entry::Occupied(existing) => Err(StateError::DuplicateWrite {
                field: existing.key().clone(),
                existing_writer: existing.get().writer.clone(),
                writer: writer.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    value,
                    writer: writer.clone(),
                });
                Ok(())
            }
        }
    }

    /// Read a field; absent optional keys yield [`FieldValue::empty`].
    #[must_use]
    pub fn get(&self, key: &FieldKey) -> Option<FieldValue> {
        match self.fields.get(key) {
            Some(slot) => Some(slot.value.clone()),
            None if self.is_optional(key) => Some(FieldValue::empty()),
            None => None,
        }
    }

    /// Read a field that must be present.
    ///
    /// # Errors
    /// `StateError::MissingField` if nothing wrote it. Optional keys are not exempt.
    pub fn get_required(&self, key: &FieldKey) -> Result<FieldValue, StateError> {
        self.fields
            .get(key)
            .map(|slot| slot.value.clone())
            .ok_or_else(|| StateError::MissingField { field: key.clone() })
    }

    /// Whether the key has been written (optional sentinels do not count).
    #[must_use]
    pub fn contains(&self, key: &FieldKey) -> bool {
        self.fields.contains_key(key)
    }

    #[must_use]
    pub fn writer_of(&self, key: &FieldKey) -> Option<StageId> {
        self.fields.get(key).map(|slot| slot.writer.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Ordered copy of every present field
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<FieldKey, FieldValue> {
        self.fields
            .iter()
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }
}
