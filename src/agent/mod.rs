//! Session orchestration: manifest lookup, then a retrying invocation of the
//! remote agent whose output is streamed back as [`ClientEvent`]s.
//!
//! [`ClientEvent`]: crate::stream::ClientEvent

mod retry;
mod runner;
mod session;

pub use retry::{BackoffConfig, RetryPolicy, RetryingInvoker};
pub use runner::Agent;
pub use session::{Session, SessionStream};
