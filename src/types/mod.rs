// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Data model shared by every engine component.

pub mod condition;
pub mod identity;
pub mod resource;

pub use condition::{
    find_condition, is_condition_true, remove_condition, set_condition, Condition,
    ConditionStatus,
};
pub use identity::{ObjectKey, ObjectRef, OwnerReference, ResourceKind};
pub use resource::{Resource, Status};
