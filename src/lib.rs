pub mod coroutine;
pub mod error;
pub mod promise;
mod registry;
pub mod task;
pub mod wait;
mod waker;

pub use coroutine::coroutine;
pub use error::{Failure, Outcome, Payload, Reason};
pub use promise::{Deferred, Promise};
pub use task::{async_fn, spawn};
pub use wait::wait;
