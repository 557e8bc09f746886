//! perf-based event sources and recorders.

pub mod counters;
pub mod event;
pub mod group;
pub mod tracepoint;
