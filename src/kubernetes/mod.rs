// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes adapters: kind discovery, a dynamic object store and a Lease lock.

pub mod convert;
pub mod crd;
pub mod lease;
pub mod store;

pub use crd::{find_kind, wait_for_kind, ServedKind};
pub use lease::KubeLease;
pub use store::KubeStore;
