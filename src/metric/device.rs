//! Periodic device recorder.
//!
//! One thread per hardware device, pinned to the device's CPU, waking on
//! a fixed interval and reading a fixed list of configuration items in
//! order. Each wakeup emits exactly one metric event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::affinity;
use crate::error::{Error, Result};
use crate::time;
use crate::topology::CpuId;
use crate::trace::{MetricClass, MetricEvent, MetricInstance, MetricValue, Trace, Writer};

/// A readable counter handle on a device: a name for the metric stream
/// and a register identity the device knows how to read.
#[derive(Debug, Clone)]
pub struct ConfigurationItem {
    pub name: String,
    pub register: u64,
}

/// A per-CPU hardware device exposing readable configuration items.
pub trait Device: Send {
    /// CPU this device is attached to.
    fn cpu(&self) -> CpuId;

    /// Read the current value of one configuration item.
    fn read(&mut self, item: &ConfigurationItem) -> std::io::Result<u64>;
}

struct SamplingState<D> {
    device: D,
    items: Vec<ConfigurationItem>,
    interval: Duration,
    writer: Box<dyn Writer>,
    instance: MetricInstance,
}

/// Records a fixed set of device registers at a fixed interval.
///
/// `start()` spawns the sampling thread and returns immediately; `stop()`
/// clears the running flag and joins. The in-flight sleep bounds shutdown
/// latency to at most one sampling interval. Dropping the recorder stops
/// it if the caller has not.
pub struct DeviceRecorder<D> {
    state: Option<SamplingState<D>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
    cpu: CpuId,
}

impl<D: Device + 'static> DeviceRecorder<D> {
    /// Bind a device and its configuration items to the trace.
    ///
    /// The metric class must carry one member per configuration item, in
    /// item order.
    pub fn new(
        device: D,
        interval: Duration,
        items: Vec<ConfigurationItem>,
        trace: &dyn Trace,
        metric_class: MetricClass,
    ) -> Self {
        assert_eq!(
            items.len(),
            metric_class.len(),
            "one metric member per configuration item"
        );

        let cpu = device.cpu();
        let writer = trace.metric_writer(&format!("device metrics for CPU {cpu}"));
        let location = writer.location();
        let instance =
            trace.metric_instance(metric_class, location, trace.system_tree_cpu_node(cpu));

        Self {
            state: Some(SamplingState {
                device,
                items,
                interval,
                writer,
                instance,
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            cpu,
        }
    }

    /// Spawn the sampling thread and return immediately.
    pub fn start(&mut self) -> Result<()> {
        let Some(state) = self.state.take() else {
            debug!(cpu = self.cpu, "device recorder already started");
            return Ok(());
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name(format!("device-{}", self.cpu))
            .spawn(move || sampling_loop(state, running))
            .map_err(Error::Io)?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Signal the sampling loop to exit and block until the thread has
    /// joined, surfacing any error the loop terminated with.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        match self.thread.take() {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanicked)?,
            None => Ok(()),
        }
    }
}

impl<D> Drop for DeviceRecorder<D> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(cpu = self.cpu, "device recorder stopped with error: {e}"),
                Err(_) => warn!(cpu = self.cpu, "device recorder thread panicked"),
            }
        }
    }
}

fn sampling_loop<D: Device>(mut state: SamplingState<D>, running: Arc<AtomicBool>) -> Result<()> {
    let cpu = state.device.cpu();
    if let Err(e) = affinity::pin_to_cpu(cpu) {
        warn!(cpu, "failed to pin sampling thread: {e}");
    }

    // One value slot per configuration item, bound to the matching metric
    // member once and reused every iteration.
    let mut values = vec![MetricValue::Uint64(0); state.items.len()];
    debug_assert_eq!(values.len(), state.instance.metric_class().len());

    while running.load(Ordering::Acquire) {
        let read_time = time::now();
        for (slot, item) in values.iter_mut().zip(&state.items) {
            // A failed device read is fatal to this recorder, not retried.
            *slot = MetricValue::Uint64(state.device.read(item)?);
        }
        state.writer.write(MetricEvent::new(read_time, values.clone()));

        thread::sleep(state.interval);
    }

    debug!(cpu, "device recorder loop exited");
    Ok(())
}
