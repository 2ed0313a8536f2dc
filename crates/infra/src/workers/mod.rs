//! Background consumers of the movement feed.

pub mod projection_worker;

pub use projection_worker::{ProjectionWorker, WorkerHandle};
