// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Leader election gating the worker pool.

pub mod elector;
pub mod lock;

pub use elector::{LeaderElector, LeaseTiming};
pub use lock::{LeaseLock, MemoryLease};
