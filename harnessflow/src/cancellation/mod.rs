//! Run cancellation and end-of-run cleanup.
//!
//! - [`CancellationToken`]: cooperative, idempotent cancellation that stage
//!   tasks can both poll and await.
//! - [`CleanupRegistry`]: LIFO async callbacks run once when the run ends,
//!   on every exit path.

mod cleanup;
mod token;

pub use cleanup::{CleanupCallback, CleanupRegistry, CleanupSummary};
pub use token::CancellationToken;
