//! metron: a concurrent counter and tracepoint recording engine.
//!
//! Three recorder variants stream timestamped metric samples into a trace
//! writer:
//!
//! - [`metric::DeviceRecorder`] wakes on a fixed interval on a CPU-pinned
//!   thread and reads a fixed list of device configuration items.
//! - [`perf::tracepoint::TracepointRecorder`] serves many per-CPU
//!   tracepoint sources from a single polling thread and is woken out of
//!   its indefinite readiness wait through a dedicated stop channel.
//! - [`perf::counters::CounterRecorder`] reads a whole hardware counter
//!   group per invocation and is driven externally.
//!
//! Trace-format management, event enumeration, and process orchestration
//! live outside this crate; recorders consume them through the contracts
//! in [`trace`], [`topology`], and [`perf::event`].

pub mod affinity;
pub mod config;
pub mod error;
pub mod logging;
pub mod metric;
pub mod mux;
pub mod perf;
pub mod stop;
pub mod time;
pub mod topology;
pub mod trace;

pub use config::Config;
pub use error::{Error, Result};
