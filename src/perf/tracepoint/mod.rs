//! Kernel tracepoint recording.

pub mod format;
pub mod reader;
pub mod recorder;

pub use format::{EventField, EventFormat};
pub use reader::{EventSource, TracepointReader};
pub use recorder::TracepointRecorder;
