// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod model_registry;
pub mod optimizer;
pub mod orchestration;

pub use model_registry::{ActiveModel, ModelRegistry, ModelRegistryError, RetrainPolicy};
pub use optimizer::{GeneticOptimizer, OptimizationResult, SearchInput};
pub use orchestration::{CycleDecision, CycleOutcome, OrchestrationError, OrchestrationLoop, PoisonList, RollbackReport};
