// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Inverted lookup from secondary objects to the primaries depending on them.

use crate::types::{ObjectKey, ObjectRef};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Tables {
    /// secondary -> primaries referencing it
    dependents: HashMap<ObjectRef, BTreeSet<ObjectKey>>,
    /// primary -> secondaries it references, to undo stale entries
    references: HashMap<ObjectKey, BTreeSet<ObjectRef>>,
}

/// Identity-to-identity table; it never holds the objects themselves.
#[derive(Clone, Default)]
pub struct Index {
    tables: Arc<RwLock<Tables>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of secondaries that `primary` references.
    pub fn update<I>(&self, primary: &ObjectKey, secondaries: I)
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        let next: BTreeSet<ObjectRef> = secondaries.into_iter().collect();
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let previous = tables.references.remove(primary).unwrap_or_default();

        for stale in previous.difference(&next) {
            if let Some(dependents) = tables.dependents.get_mut(stale) {
                dependents.remove(primary);
                if dependents.is_empty() {
                    tables.dependents.remove(stale);
                }
            }
        }
        for secondary in &next {
            tables
                .dependents
                .entry(secondary.clone())
                .or_default()
                .insert(primary.clone());
        }
        if !next.is_empty() {
            tables.references.insert(primary.clone(), next);
        }
    }

    pub fn remove_primary(&self, primary: &ObjectKey) {
        self.update(primary, std::iter::empty());
    }

    /// Primaries depending on `secondary`, in stable order.
    pub fn lookup(&self, secondary: &ObjectRef) -> Vec<ObjectKey> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .dependents
            .get(secondary)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn references_of(&self, primary: &ObjectKey) -> Vec<ObjectRef> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .references
            .get(primary)
            .map(|refs| refs.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;

    fn make_config_ref(name: &str) -> ObjectRef {
        ObjectRef::new(
            ResourceKind::new("", "v1", "ConfigMap"),
            ObjectKey::new("default", name),
        )
    }

    #[test]
    fn test_lookup_returns_all_dependents() {
        let index = Index::new();
        let a = ObjectKey::new("default", "a");
        let b = ObjectKey::new("default", "b");

        index.update(&a, [make_config_ref("shared")]);
        index.update(&b, [make_config_ref("shared"), make_config_ref("own")]);

        assert_eq!(index.lookup(&make_config_ref("shared")), vec![a, b.clone()]);
        assert_eq!(index.lookup(&make_config_ref("own")), vec![b]);
    }

    #[test]
    fn test_update_drops_stale_references() {
        let index = Index::new();
        let a = ObjectKey::new("default", "a");

        index.update(&a, [make_config_ref("old")]);
        index.update(&a, [make_config_ref("new")]);

        assert!(index.lookup(&make_config_ref("old")).is_empty());
        assert_eq!(index.lookup(&make_config_ref("new")), vec![a.clone()]);
        assert_eq!(index.references_of(&a), vec![make_config_ref("new")]);
    }

    #[test]
    fn test_remove_primary() {
        let index = Index::new();
        let a = ObjectKey::new("default", "a");
        index.update(&a, [make_config_ref("cfg")]);

        index.remove_primary(&a);

        assert!(index.lookup(&make_config_ref("cfg")).is_empty());
        assert!(index.references_of(&a).is_empty());
    }
}
