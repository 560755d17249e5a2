//! Profiling agent core: job model, container discovery, profiler drivers
//! and the stdout event protocol used by the client.

pub mod api;
pub mod compress;
mod config;
mod discovery;
mod driver;
mod duration;
mod error;
mod event_logger;
pub mod exec;
mod flamegraph;
pub mod fsutil;
mod job;
pub mod profiler;
mod publish;
pub mod runtime;
pub mod testing;

pub use config::*;
pub use discovery::*;
pub use driver::*;
pub use duration::*;
pub use error::*;
pub use event_logger::*;
pub use flamegraph::*;
pub use job::*;
pub use publish::*;
