//! Background compute primitives.
//!
//! - [`TaskPool`] - worker threads executing boxed jobs
//! - [`TaskHandle`] - channel-backed handle to a job's result, polled with
//!   `try_recv()` or awaited

mod pool;
mod task_handle;

pub use pool::TaskPool;
pub use task_handle::TaskHandle;
