//! In-memory trace used by the recorder integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use metron::trace::{Location, MetricEvent, Trace, Writer};

/// Writer that appends into a shared vector.
pub struct VecWriter {
    location: Location,
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl Writer for VecWriter {
    fn location(&self) -> Location {
        self.location.clone()
    }

    fn write(&mut self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Trace backend keeping every stream in memory.
#[derive(Default)]
pub struct MemoryTrace {
    streams: Mutex<Vec<(String, Arc<Mutex<Vec<MetricEvent>>>)>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of the i-th allocated stream.
    pub fn stream(&self, i: usize) -> Vec<MetricEvent> {
        let streams = self.streams.lock().unwrap();
        let events = streams[i].1.lock().unwrap().clone();
        events
    }

    pub fn stream_name(&self, i: usize) -> String {
        self.streams.lock().unwrap()[i].0.clone()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    /// Events of the only stream; panics unless exactly one was allocated.
    pub fn single_stream(&self) -> Vec<MetricEvent> {
        assert_eq!(self.stream_count(), 1, "expected exactly one stream");
        self.stream(0)
    }
}

impl Trace for MemoryTrace {
    fn metric_writer(&self, name: &str) -> Box<dyn Writer> {
        let events = Arc::new(Mutex::new(Vec::new()));
        self.streams
            .lock()
            .unwrap()
            .push((name.to_string(), Arc::clone(&events)));
        Box::new(VecWriter {
            location: Location(name.to_string()),
            events,
        })
    }
}
