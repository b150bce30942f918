// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types and pure algorithms of the connection optimization engine.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Module catalog model, connection graphs and diffs, the
//!   predictor contract, graph encoding operators, fitness, configuration,
//!   events and the ports implemented by `crate::infrastructure`.

pub mod catalog;
pub mod connection;
pub mod encoding;
pub mod engine_config;
pub mod events;
pub mod fitness;
pub mod module;
pub mod predictor;
pub mod repository;
pub mod sample;
