// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client SDK for the Loom authz endpoint.
//!
//! Decision requests raised within a short window are coalesced into one
//! HTTP round trip by the [`Batcher`], equal questions are deduplicated, and
//! answers are memoized in a [`ClientCache`] with hierarchical invalidation.

pub mod batch;
pub mod cache;
pub mod client;
pub mod error;
pub mod key;

pub use batch::{BatchConfig, BatchJob, Batcher, DedupeFn, JobHandle, JobRunner};
pub use cache::{CachedFuture, ClientCache, Invalidation};
pub use client::{AuthzClient, AuthzClientBuilder, DEFAULT_ENDPOINT_PATH, SUBJECT_CACHE_KEY};
pub use error::{ClientError, Result};
pub use key::{key_matches_path, path_prefix, stable_key, stable_stringify};
