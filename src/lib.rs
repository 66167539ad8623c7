// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod cache;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod events;
pub mod http;
pub mod kubernetes;
pub mod leader;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod status;
pub mod store;
pub mod types;
pub mod watch;

#[cfg(test)]
pub mod test_utils;
