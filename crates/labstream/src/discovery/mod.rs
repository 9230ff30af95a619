// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream discovery over UDP multicast and unicast.
//!
//! A [`resolver::Resolver`] emits waves of probe packets to the configured
//! multicast groups and known peers, collects replies into a deduplicated
//! result store, and hands matching stream descriptors back to the caller.
//! Discovery runs either as a bounded one-shot on the caller's thread or
//! continuously on a background worker.

pub mod attempt;
pub mod endpoints;
pub mod protocol;
pub mod query;
pub mod results;
pub mod resolver;
pub mod stream_info;

pub use resolver::Resolver;
pub use stream_info::StreamInfo;
