//! # convergio-store — persistent plans, tasks, checkpoints and usage
//!
//! SQLite-backed persistence for the orchestration core. One database file
//! (default `~/.convergio/plans.db`) holds:
//!
//! - **plans** and hierarchical **tasks** with atomic status transitions —
//!   the [`tasks::TaskRepository::claim`] conditional update is the
//!   mutual-exclusion point for concurrent workers;
//! - append-only **workflow checkpoints** ([`checkpoints`]);
//! - **daily usage aggregates** backing the cost controller ([`usage`]);
//! - plan **exports** in Markdown and JSON plus a Mermaid timeline
//!   ([`export`]).
//!
//! The schema ships embedded and is applied idempotently at open time; see
//! [`db::Database`]. Connections use WAL journaling, enforced foreign keys,
//! a 5 s busy timeout and `synchronous=NORMAL`.

pub mod checkpoints;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod plans;
pub mod tasks;
pub mod usage;

pub use checkpoints::CheckpointRepository;
pub use db::{Database, DatabasePool};
pub use error::{Result, StoreError};
pub use export::{export_json, export_markdown, timeline_mermaid};
pub use models::{CheckpointRecord, Plan, PlanProgress, PlanStatus, Task, TaskStatus};
pub use plans::PlanRepository;
pub use tasks::{TaskRepository, MAX_TASK_DEPTH};
pub use usage::{UsageDay, UsageRepository};
