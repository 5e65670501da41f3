//! kse - Spec Orchestration Engine
//!
//! Executes a set of named specs by spawning one autonomous codex agent
//! process per spec under a dependency graph, with:
//! - Batched execution following the dependency DAG
//! - Bounded, adaptive parallelism with launch-rate budgets
//! - Rate-limit-aware retry and backoff policies
//! - Typed lifecycle events and persistable status snapshots

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
