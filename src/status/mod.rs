// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

pub mod retry;
pub mod writer;

pub use retry::retry_on_conflict;
pub use writer::{StatusWriter, WriteMode};
