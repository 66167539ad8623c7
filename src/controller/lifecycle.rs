// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deletion lifecycle of a primary object, as seen by one finalizer.

use crate::types::Resource;

/// Where an object stands with respect to our finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Live, but the finalizer has not been persisted yet.
    Pending,
    /// Live with the finalizer in place; normal reconciliation.
    Live,
    /// Deletion requested and our cleanup is still outstanding.
    Terminating,
    /// Deletion requested and nothing is left for us to do. Other
    /// finalizers may still hold the record.
    Released,
}

impl Lifecycle {
    /// Derive the state from the record. Without a finalizer an object is
    /// `Live` until deletion is requested.
    pub fn of(object: &Resource, finalizer: Option<&str>) -> Self {
        let holds = finalizer.map(|f| object.has_finalizer(f));
        match (object.is_deleting(), holds) {
            (false, Some(false)) => Lifecycle::Pending,
            (false, _) => Lifecycle::Live,
            (true, Some(true)) => Lifecycle::Terminating,
            (true, _) => Lifecycle::Released,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectKey, ResourceKind};
    use chrono::Utc;
    use serde_json::json;

    const FINALIZER: &str = "example.com/cleanup";

    fn make_widget(finalizers: &[&str], deleting: bool) -> Resource {
        let mut r = Resource::new(
            ResourceKind::new("example.com", "v1", "Widget"),
            ObjectKey::new("default", "a"),
            json!({}),
        );
        r.finalizers = finalizers.iter().map(|f| f.to_string()).collect();
        if deleting {
            r.deletion_timestamp = Some(Utc::now());
        }
        r
    }

    #[test]
    fn test_live_states() {
        assert_eq!(Lifecycle::of(&make_widget(&[], false), Some(FINALIZER)), Lifecycle::Pending);
        assert_eq!(
            Lifecycle::of(&make_widget(&[FINALIZER], false), Some(FINALIZER)),
            Lifecycle::Live
        );
        assert_eq!(Lifecycle::of(&make_widget(&[], false), None), Lifecycle::Live);
    }

    #[test]
    fn test_deleting_states() {
        assert_eq!(
            Lifecycle::of(&make_widget(&["other/x", FINALIZER], true), Some(FINALIZER)),
            Lifecycle::Terminating
        );
        assert_eq!(
            Lifecycle::of(&make_widget(&["other/x"], true), Some(FINALIZER)),
            Lifecycle::Released
        );
        assert_eq!(
            Lifecycle::of(&make_widget(&["other/x"], true), None),
            Lifecycle::Released
        );
    }
}
