// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Object cache and secondary-to-primary index.

pub mod index;
pub mod objects;

pub use index::Index;
pub use objects::ObjectCache;
