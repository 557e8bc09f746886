//! Multiplexed tracepoint recorder.
//!
//! One background thread serves every configured tracepoint on every
//! monitored CPU. Each source's descriptor and the stop channel sit in
//! one readiness poll; the thread drains whichever source wakes it and
//! exits when the stop channel fires.

use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mux::{Multiplexer, PollMultiplexer, Readiness};
use crate::stop::{stop_channel, StopReceiver, StopSender};
use crate::topology::Topology;
use crate::trace::{MetricClass, MetricMode, MetricType, Trace};

use super::format::EventFormat;
use super::reader::{EventSource, TracepointReader};

/// Handle to the recording thread.
///
/// Stopping is idempotent and may come from any thread through a cloned
/// [`StopSender`]; [`TracepointRecorder::join`] surfaces the thread's
/// outcome. Dropping without joining stops and joins with logging only.
pub struct TracepointRecorder {
    stop: StopSender,
    thread: Option<JoinHandle<Result<()>>>,
}

impl TracepointRecorder {
    /// Open every configured tracepoint on every CPU of the topology.
    ///
    /// Unlike counter collection this is all-or-nothing: a name that does
    /// not resolve fails construction, since a trace with silently missing
    /// tracepoints is worse than no trace.
    pub fn new(trace: &dyn Trace, config: &Config, topology: &Topology) -> Result<Self> {
        let mut sources: Vec<Box<dyn EventSource>> = Vec::new();

        for name in &config.tracepoint_events {
            let format = std::sync::Arc::new(EventFormat::resolve(name)?);
            // One class per event; every per-CPU source of the event
            // shares it.
            let class = event_class(trace, &format);

            for &cpu in topology.cpus() {
                sources.push(Box::new(TracepointReader::open(
                    cpu,
                    format.clone(),
                    config.mmap_pages,
                    trace,
                    class.clone(),
                )?));
            }
        }

        Self::with_sources(PollMultiplexer::new()?, sources)
    }

    /// Start the recording thread over prepared sources.
    pub fn with_sources<M, S>(mux: M, sources: Vec<S>) -> Result<Self>
    where
        M: Multiplexer + 'static,
        S: EventSource + 'static,
    {
        let (stop, stop_rx) = stop_channel()?;

        let thread = thread::Builder::new()
            .name("tracepoint".to_string())
            .spawn(move || poll_loop(mux, sources, stop_rx))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Request the recording thread to stop. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop.signal();
    }

    /// A sender other threads can use to stop this recorder.
    pub fn stop_handle(&self) -> StopSender {
        self.stop.clone()
    }

    /// Stop and wait for the thread, surfacing its outcome.
    pub fn join(mut self) -> Result<()> {
        self.stop.signal();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| Error::ThreadPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for TracepointRecorder {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.signal();
        match thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("tracepoint recording failed: {e}"),
            Err(_) => warn!("tracepoint thread panicked"),
        }
    }
}

/// Build a tracepoint event's metric class: one member per record field.
fn event_class(trace: &dyn Trace, format: &EventFormat) -> MetricClass {
    let mut class = trace.metric_class();
    for field in format.fields() {
        class.add_member(trace.metric_member(
            &format!("{}::{}", format.name(), field.name()),
            "?",
            MetricMode::AbsoluteNext,
            MetricType::Int64,
            "#",
        ));
    }
    class
}

fn poll_loop<M: Multiplexer, S: EventSource>(
    mut mux: M,
    mut sources: Vec<S>,
    stop_rx: StopReceiver,
) -> Result<()> {
    use std::os::fd::AsRawFd;

    for (token, source) in sources.iter().enumerate() {
        mux.register(token, source.fd())?;
    }
    let stop_token = sources.len();
    mux.register(stop_token, stop_rx.as_raw_fd())?;

    let mut ready: Vec<Readiness> = Vec::new();

    let result = 'poll: loop {
        let n = match mux.wait(&mut ready) {
            Ok(n) => n,
            Err(e) => break Err(e.into()),
        };
        // An indefinite wait that returns without readiness means the
        // poll set itself is broken.
        if n == 0 {
            break Err(Error::PollProtocol(
                "readiness wait returned no ready descriptors",
            ));
        }

        if let Some(bad) = ready.iter().find(|r| r.error) {
            warn!(token = bad.token, "error or hangup on polled descriptor");
            break Err(Error::PollProtocol(
                "unexpected error or hangup flags on polled descriptor",
            ));
        }

        for r in &ready {
            if !r.readable {
                continue;
            }
            if r.token == stop_token {
                debug!("stop requested");
                break 'poll Ok(());
            }
            if let Err(e) = sources[r.token].read() {
                break 'poll Err(e);
            }
        }
    };

    // Every source is stopped and drained on all exit paths so the trace
    // holds everything recorded up to the failure or the stop request.
    for (token, source) in sources.iter_mut().enumerate() {
        if let Err(e) = source.stop() {
            warn!(token, "failed to stop event source: {e}");
        }
    }

    result
}
