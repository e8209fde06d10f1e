//! Task scheduling for strata pipelines.
//!
//! A [`TaskScheduler`] owns a resizable pool of OS worker threads that pull
//! boxed [`Task`]s from one shared multi-producer/multi-consumer queue.
//! Producers enqueue through a [`ProducerToken`]; workers do not care which
//! token a task came from.
//!
//! Workers block on the queue with a timeout so they notice stop requests
//! without spinning. Dropping the scheduler stops and joins every worker.
#![forbid(unsafe_code)]

pub mod scheduler;
pub mod task;

pub use scheduler::{ProducerToken, TaskScheduler};
pub use task::Task;

pub use strata_result::{Error, Result};
