//! Per-thread counter-group recording.
//!
//! A [`CounterRecorder`] is driven externally: every call to
//! [`CounterRecorder::write`] reads the whole counter group once and
//! emits one metric event carrying the counters followed by the last
//! executed CPU, time enabled, and time running.

use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::error::{Error, Result};
use crate::perf::event::{default_mem_events, EventDescriptor, EventProvider};
use crate::perf::group::{CounterGroup, PerfCounterGroup};
use crate::time;
use crate::trace::{
    MetricClass, MetricEvent, MetricInstance, MetricMode, MetricType, MetricValue, Scope, Trace,
    Writer,
};

/// Derived members trailing the counters in the schema: last executed
/// CPU, time enabled, time running.
const DERIVED_MEMBERS: usize = 3;

/// Resolve the active counter set.
///
/// User-requested names are resolved individually; an unknown name is
/// logged and dropped, not an error. With no names configured the
/// platform memory events plus instructions and cycles are used.
pub fn collect_counters(
    requested: &[String],
    provider: &dyn EventProvider,
) -> Result<Vec<EventDescriptor>> {
    let mut counters = Vec::new();

    for name in requested {
        match provider.get_event_by_name(name) {
            Ok(desc) => counters.push(desc),
            Err(Error::UnknownEvent(_)) => {
                warn!("'{name}' does not name a known event, ignoring");
            }
            Err(e) => return Err(e),
        }
    }

    if requested.is_empty() {
        counters.extend(default_mem_events());
        counters.push(provider.get_event_by_name("instructions")?);
        counters.push(provider.get_event_by_name("cpu-cycles")?);
    }

    Ok(counters)
}

/// Build the schema for a counter recorder before any instance exists:
/// one member per active counter, then the three derived members.
pub fn get_metric_class(
    trace: &dyn Trace,
    requested: &[String],
    provider: &dyn EventProvider,
) -> MetricClass {
    let mut class = trace.metric_class();

    for name in requested {
        if provider.has_event(name) {
            class.add_member(trace.metric_member(
                name,
                name,
                MetricMode::AccumulatedStart,
                MetricType::Double,
                "#",
            ));
        }
    }

    if requested.is_empty() {
        for desc in default_mem_events() {
            class.add_member(trace.metric_member(
                &desc.name,
                &desc.name,
                MetricMode::AccumulatedStart,
                MetricType::Double,
                "#",
            ));
        }
        class.add_member(trace.metric_member(
            "instructions",
            "instructions",
            MetricMode::AccumulatedStart,
            MetricType::Double,
            "#",
        ));
        class.add_member(trace.metric_member(
            "cycles",
            "CPU cycles",
            MetricMode::AccumulatedStart,
            MetricType::Double,
            "#",
        ));
    }

    class.add_member(trace.metric_member(
        "CPU",
        "CPU executing the task",
        MetricMode::AbsoluteLast,
        MetricType::Int64,
        "cpuid",
    ));
    class.add_member(trace.metric_member(
        "time_enabled",
        "time event active",
        MetricMode::AccumulatedStart,
        MetricType::Uint64,
        "ns",
    ));
    class.add_member(trace.metric_member(
        "time_running",
        "time event on CPU",
        MetricMode::AccumulatedStart,
        MetricType::Uint64,
        "ns",
    ));

    class
}

/// Reads the last-scheduled CPU of one task from its stat file.
pub struct ProcStat {
    path: PathBuf,
}

impl ProcStat {
    pub fn new(pid: libc::pid_t, tid: libc::pid_t) -> Self {
        Self {
            path: PathBuf::from(format!("/proc/{pid}/task/{tid}/stat")),
        }
    }

    /// Last CPU the task executed on (stat field 39).
    pub fn last_cpu(&self) -> Result<i64> {
        let contents = fs::read_to_string(&self.path)?;
        parse_last_cpu(&contents).ok_or_else(|| {
            Error::InvalidFormat(format!("malformed stat file {}", self.path.display()))
        })
    }
}

/// The comm field may contain spaces and parentheses, so fields are
/// counted from after the closing parenthesis: the processor field is
/// field 39 overall, field 37 of the tail.
fn parse_last_cpu(stat: &str) -> Option<i64> {
    let tail = &stat[stat.rfind(')')? + 1..];
    tail.split_whitespace().nth(36)?.parse().ok()
}

/// Per-thread counter recorder.
///
/// Construction resolves and opens the counter group; sampling cadence is
/// the caller's concern. The schema must reserve exactly
/// [`DERIVED_MEMBERS`] slots beyond the counters; this is asserted at
/// construction and is a precondition for safe buffer indexing.
pub struct CounterRecorder<G> {
    writer: Box<dyn Writer>,
    instance: MetricInstance,
    group: G,
    proc_stat: ProcStat,
    values: Vec<MetricValue>,
}

impl CounterRecorder<PerfCounterGroup> {
    pub fn new(
        pid: libc::pid_t,
        tid: libc::pid_t,
        trace: &dyn Trace,
        metric_class: MetricClass,
        scope: Scope,
        requested: &[String],
        provider: &dyn EventProvider,
    ) -> Result<Self> {
        let counters = collect_counters(requested, provider)?;
        let group = PerfCounterGroup::open(tid, &counters)?;
        Self::with_group(pid, tid, trace, metric_class, scope, group)
    }
}

impl<G: CounterGroup> CounterRecorder<G> {
    /// Bind an already-open counter group to the trace.
    pub fn with_group(
        pid: libc::pid_t,
        tid: libc::pid_t,
        trace: &dyn Trace,
        metric_class: MetricClass,
        scope: Scope,
        group: G,
    ) -> Result<Self> {
        assert_eq!(
            group.len() + DERIVED_MEMBERS,
            metric_class.len(),
            "metric class must hold the counters plus CPU, time_enabled, time_running"
        );

        let writer = trace.metric_writer(&format!("metrics for thread {tid}"));
        let location = writer.location();
        let instance = trace.metric_instance(metric_class, location, scope);
        let values = vec![MetricValue::Uint64(0); instance.metric_class().len()];

        Ok(Self {
            writer,
            instance,
            group,
            proc_stat: ProcStat::new(pid, tid),
            values,
        })
    }

    /// Emit one sample: a single grouped counter read plus the derived
    /// bookkeeping values, populated in schema order.
    pub fn write(&mut self) -> Result<()> {
        let read_time = time::now();

        let reading = self.group.read()?;
        debug_assert!(reading.time_running <= reading.time_enabled);
        debug_assert_eq!(reading.values.len(), self.group.len());

        let n = reading.values.len();
        for (slot, value) in self.values.iter_mut().zip(&reading.values) {
            *slot = MetricValue::Double(*value as f64);
        }
        self.values[n] = MetricValue::Int64(self.proc_stat.last_cpu()?);
        self.values[n + 1] = MetricValue::Uint64(reading.time_enabled);
        self.values[n + 2] = MetricValue::Uint64(reading.time_running);

        self.writer
            .write(MetricEvent::new(read_time, self.values.clone()));
        Ok(())
    }

    pub fn metric_class(&self) -> &MetricClass {
        self.instance.metric_class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_processor_field() {
        // pid 1234, comm "cat", 52 fields total; processor is field 39.
        let stat = "1234 (cat) R 1 1234 1234 0 -1 4194304 100 0 0 0 1 1 0 0 20 0 1 0 \
                    100 1000000 100 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 \
                    3 0 0 0 0 0 0 0 0 0 0 0 0 0";
        assert_eq!(parse_last_cpu(stat), Some(3));
    }

    #[test]
    fn comm_with_spaces_and_parens_does_not_shift_fields() {
        let stat = "42 (tricky (name) x) S 1 42 42 0 -1 4194304 100 0 0 0 1 1 0 0 20 0 1 0 \
                    100 1000000 100 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 \
                    7 0 0 0 0 0 0 0 0 0 0 0 0 0";
        assert_eq!(parse_last_cpu(stat), Some(7));
    }

    #[test]
    fn truncated_stat_is_rejected() {
        assert_eq!(parse_last_cpu("1 (x) R 1 2 3"), None);
        assert_eq!(parse_last_cpu("no parens at all"), None);
    }
}
