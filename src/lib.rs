//! Asynchronous multi-stage course generation.
//!
//! A [`GenerationJob`](job::GenerationJob) carries a typed [`Outline`](outline::Outline).
//! The [`CourseOrchestrator`](orchestrator::CourseOrchestrator) runs it in the
//! background: the [`StageCoordinator`](coordinator::StageCoordinator) walks
//! the outline parent-first, one generator per node, persisting every stage
//! result to a [`JobStore`](store::JobStore) as it settles.

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generators;
pub mod job;
pub mod notify;
pub mod orchestrator;
pub mod outline;
pub mod store;
pub mod trigger;
