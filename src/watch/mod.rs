// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

pub mod dispatcher;
pub mod event;
pub mod predicate;

pub use dispatcher::{CacheSync, Dispatcher, MapFn, ReferenceFn, SecondaryWatch, Trigger};
pub use event::WatchEvent;
pub use predicate::Predicate;
