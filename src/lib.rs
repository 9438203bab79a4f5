//! Ограниченный async пул задач с мягким таймаутом
//!
//! # Features
//! - Фиксированное число воркеров и ограниченная очередь (backpressure)
//! - Мягкий таймаут на задачу: воркер перестаёт ждать, задача не убивается
//! - Ошибки задач собираются в ограниченный поток ошибок
//! - Снимок счётчиков submitted / finished / active
//! - Graceful shutdown: очередь дочищается перед остановкой воркеров

pub mod context;
pub mod errors;
mod handle;
mod job;
pub mod model;
pub mod pool;
mod queue;
pub mod stream;

pub use context::{DoneCause, ExecutionContext};
pub use errors::{ConfigError, JobError, SpawnError};
pub use job::ANONYMOUS_JOB;
pub use model::PoolState;
pub use pool::{Config, JobPool, JobPoolInner};
pub use stream::ErrorStream;
