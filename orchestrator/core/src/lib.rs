// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection Optimization Engine
//!
//! Decides which registered modules should be linked, and with what
//! parameters, by running a genetic search over candidate connection graphs
//! scored by a swappable compatibility predictor.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** `domain` holds the model and algorithms, `application` the
//!   optimizer, model registry and orchestration loop, `infrastructure` the
//!   in-memory adapters, predictor families and the event bus.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
