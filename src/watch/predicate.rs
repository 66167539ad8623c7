// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Event filters evaluated on (before, after) pairs of records.
//!
//! A create has no `before`, a delete has no `after`.

use crate::constants::annotations;
use crate::types::Resource;
use std::sync::Arc;

type Filter = dyn Fn(Option<&Resource>, Option<&Resource>) -> bool + Send + Sync;

#[derive(Clone)]
pub struct Predicate(Arc<Filter>);

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Predicate")
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self::default_primary()
    }
}

impl Predicate {
    pub fn new<F>(filter: F) -> Self
    where
        F: Fn(Option<&Resource>, Option<&Resource>) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(filter))
    }

    pub fn matches(&self, before: Option<&Resource>, after: Option<&Resource>) -> bool {
        (self.0)(before, after)
    }

    pub fn always() -> Self {
        Self::new(|_, _| true)
    }

    /// Passes creates and deletes; updates only when `changed` says so.
    fn on_update<F>(changed: F) -> Self
    where
        F: Fn(&Resource, &Resource) -> bool + Send + Sync + 'static,
    {
        Self::new(move |before, after| match (before, after) {
            (Some(before), Some(after)) => changed(before, after),
            _ => true,
        })
    }

    pub fn resource_version_changed() -> Self {
        Self::on_update(|before, after| before.resource_version != after.resource_version)
    }

    pub fn generation_changed() -> Self {
        Self::on_update(|before, after| before.generation != after.generation)
    }

    pub fn deletion_requested() -> Self {
        Self::on_update(|before, after| before.deletion_timestamp != after.deletion_timestamp)
    }

    pub fn finalizers_changed() -> Self {
        Self::on_update(|before, after| before.finalizers != after.finalizers)
    }

    pub fn labels_changed() -> Self {
        Self::on_update(|before, after| before.labels != after.labels)
    }

    /// Rejects events for objects whose annotation `key` equals `value`.
    pub fn annotation_absent(key: &'static str, value: &'static str) -> Self {
        Self::new(move |before, after| {
            after
                .or(before)
                .map_or(true, |o| o.annotation(key) != Some(value))
        })
    }

    /// Skip objects annotated as paused.
    pub fn not_paused() -> Self {
        Self::annotation_absent(annotations::PAUSED, "true")
    }

    /// Spec changes and deletion requests. Status and finalizer writes are ignored.
    pub fn default_primary() -> Self {
        Self::generation_changed().or(Self::deletion_requested())
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::new(move |before, after| self.matches(before, after) && other.matches(before, after))
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::new(move |before, after| self.matches(before, after) || other.matches(before, after))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::new(move |before, after| !self.matches(before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectKey, ResourceKind};
    use chrono::Utc;
    use serde_json::json;

    fn make_widget(generation: i64, version: &str) -> Resource {
        let mut r = Resource::new(
            ResourceKind::new("example.com", "v1", "Widget"),
            ObjectKey::new("default", "a"),
            json!({}),
        );
        r.generation = generation;
        r.resource_version = version.to_string();
        r
    }

    #[test]
    fn test_generation_changed_ignores_status_writes() {
        let p = Predicate::generation_changed();
        let before = make_widget(1, "1");
        let status_only = make_widget(1, "2");
        let spec_change = make_widget(2, "3");

        assert!(!p.matches(Some(&before), Some(&status_only)));
        assert!(p.matches(Some(&status_only), Some(&spec_change)));
        assert!(p.matches(None, Some(&before)));
        assert!(p.matches(Some(&before), None));
    }

    #[test]
    fn test_resource_version_changed() {
        let p = Predicate::resource_version_changed();
        let a = make_widget(1, "1");
        assert!(!p.matches(Some(&a), Some(&a)));
        assert!(p.matches(Some(&a), Some(&make_widget(1, "2"))));
    }

    #[test]
    fn test_default_primary_sees_deletion_but_not_finalizers() {
        let p = Predicate::default_primary();
        let before = make_widget(1, "1");

        let mut finalized = make_widget(1, "2");
        finalized.add_finalizer("x/y");
        assert!(!p.matches(Some(&before), Some(&finalized)));
        assert!(Predicate::finalizers_changed().matches(Some(&before), Some(&finalized)));

        let mut deleting = finalized.clone();
        deleting.resource_version = "3".to_string();
        deleting.deletion_timestamp = Some(Utc::now());
        assert!(p.matches(Some(&finalized), Some(&deleting)));

        let mut status_only = finalized.clone();
        status_only.resource_version = "4".to_string();
        assert!(!p.matches(Some(&finalized), Some(&status_only)));
    }

    #[test]
    fn test_not_paused() {
        let p = Predicate::not_paused();
        let mut paused = make_widget(1, "1");
        paused
            .annotations
            .insert(annotations::PAUSED.to_string(), "true".to_string());

        assert!(!p.matches(None, Some(&paused)));
        assert!(p.matches(None, Some(&make_widget(1, "1"))));
    }

    #[test]
    fn test_combinators() {
        let a = make_widget(1, "1");
        assert!(Predicate::always().and(Predicate::always()).matches(None, Some(&a)));
        assert!(!Predicate::always().not().matches(None, Some(&a)));
        assert!(Predicate::always().not().or(Predicate::always()).matches(None, Some(&a)));
    }
}
