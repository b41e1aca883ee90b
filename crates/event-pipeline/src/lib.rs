// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Two-stage event pipeline for uploaded NDJSON log files.
//!
//! The [`validator`] turns storage-arrival notifications into [`model::Job`]s and publishes
//! them to a queue. The [`consumer`] takes one delivered job at a time, streams the source file
//! through the [`aggregator`] and persists a [`model::JobResult`] keyed by job id.
//!
//! Delivery is at-least-once. A redelivered job produces a fresh result that overwrites the
//! previous one, so processing the same job twice leaves the store holding only the latest
//! attempt.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod errors;
pub mod key;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod result_store;
pub mod storage;
pub mod validator;
pub mod worker;
