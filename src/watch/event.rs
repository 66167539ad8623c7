// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Change events emitted by a store's watch stream.

use crate::types::{ObjectKey, Resource};

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Resource),
    Modified(Resource),
    Deleted(Resource),
    /// The initial listing has been delivered; everything after this is live.
    Synced,
}

impl WatchEvent {
    pub fn object(&self) -> Option<&Resource> {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => Some(o),
            WatchEvent::Synced => None,
        }
    }

    pub fn key(&self) -> Option<&ObjectKey> {
        self.object().map(|o| &o.key)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, WatchEvent::Deleted(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
            WatchEvent::Synced => "synced",
        }
    }
}
