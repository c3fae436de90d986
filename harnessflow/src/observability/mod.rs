//! Observability: subscriber setup and run/stage spans.

mod logging;
mod spans;

pub use logging::{init_tracing, LogFormat};
pub use spans::{run_span, stage_span};
