//! Counter selection policy and counter recorder output shape.

mod common;

use std::io;

use common::MemoryTrace;
use metron::perf::counters::{collect_counters, get_metric_class, CounterRecorder};
use metron::perf::event::{EventDescriptor, EventProvider};
use metron::perf::group::{CounterGroup, GroupReading};
use metron::trace::{MetricType, MetricValue, Scope};
use metron::{Error, Result};

/// Provider that knows a small fixed catalog.
struct FakeProvider;

impl EventProvider for FakeProvider {
    fn get_event_by_name(&self, name: &str) -> Result<EventDescriptor> {
        match name {
            "instructions" | "cpu-cycles" | "cycles" | "pmu-special" => {
                Ok(EventDescriptor::new(name, 4, 0x99))
            }
            _ => Err(Error::UnknownEvent(name.to_string())),
        }
    }
}

#[test]
fn empty_request_selects_default_set() {
    let counters = collect_counters(&[], &FakeProvider).unwrap();
    let names: Vec<_> = counters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "L1-dcache-loads",
            "L1-dcache-load-misses",
            "LLC-loads",
            "LLC-load-misses",
            "instructions",
            "cpu-cycles",
        ]
    );
}

#[test]
fn unknown_requested_names_are_dropped_not_fatal() {
    let requested = vec![
        "pmu-special".to_string(),
        "definitely-not-an-event".to_string(),
        "instructions".to_string(),
    ];
    let counters = collect_counters(&requested, &FakeProvider).unwrap();
    let names: Vec<_> = counters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["pmu-special", "instructions"]);
}

#[test]
fn metric_class_reserves_derived_members() {
    let trace = MemoryTrace::new();
    let class = get_metric_class(&trace, &[], &FakeProvider);

    // 4 default memory events + instructions + cycles + 3 derived.
    assert_eq!(class.len(), 9);
    let tail: Vec<_> = class.members()[6..].iter().map(|m| m.name.as_str()).collect();
    assert_eq!(tail, ["CPU", "time_enabled", "time_running"]);
    assert_eq!(class.members()[6].ty, MetricType::Int64);
    assert_eq!(class.members()[7].ty, MetricType::Uint64);
    assert_eq!(class.members()[8].ty, MetricType::Uint64);
}

/// Group that replays scripted readings.
struct FakeGroup {
    len: usize,
    readings: Vec<GroupReading>,
    next: usize,
}

impl FakeGroup {
    fn new(len: usize, readings: Vec<GroupReading>) -> Self {
        Self {
            len,
            readings,
            next: 0,
        }
    }
}

impl CounterGroup for FakeGroup {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&mut self) -> io::Result<GroupReading> {
        let reading = self.readings[self.next].clone();
        self.next += 1;
        Ok(reading)
    }
}

fn reading(values: &[u64], enabled: u64, running: u64) -> GroupReading {
    GroupReading {
        values: values.to_vec(),
        time_enabled: enabled,
        time_running: running,
    }
}

#[test]
fn write_emits_values_in_schema_order() {
    let trace = MemoryTrace::new();
    let requested = vec!["pmu-special".to_string(), "instructions".to_string()];
    let class = get_metric_class(&trace, &requested, &FakeProvider);
    assert_eq!(class.len(), 5);

    let group = FakeGroup::new(
        2,
        vec![
            reading(&[100, 2000], 50, 40),
            reading(&[150, 2600], 90, 75),
        ],
    );

    // The test process itself serves as the monitored task.
    let pid = std::process::id() as libc::pid_t;
    let mut recorder = CounterRecorder::with_group(
        pid,
        pid,
        &trace,
        class,
        Scope::Thread(pid),
        group,
    )
    .unwrap();

    recorder.write().unwrap();
    recorder.write().unwrap();

    let events = trace.single_stream();
    assert_eq!(events.len(), 2);

    let first = &events[0].values;
    assert_eq!(first.len(), 5);
    assert_eq!(first[0], MetricValue::Double(100.0));
    assert_eq!(first[1], MetricValue::Double(2000.0));
    assert!(matches!(first[2], MetricValue::Int64(cpu) if cpu >= 0));
    assert_eq!(first[3], MetricValue::Uint64(50));
    assert_eq!(first[4], MetricValue::Uint64(40));

    let second = &events[1].values;
    assert_eq!(second[0], MetricValue::Double(150.0));
    assert_eq!(second[3], MetricValue::Uint64(90));
    assert_eq!(second[4], MetricValue::Uint64(75));

    assert!(events[0].time.nanos() <= events[1].time.nanos());
    for event in &events {
        let (MetricValue::Uint64(enabled), MetricValue::Uint64(running)) =
            (event.values[3], event.values[4])
        else {
            panic!("derived members have fixed types");
        };
        assert!(running <= enabled);
    }
}

#[test]
#[should_panic(expected = "metric class must hold the counters")]
fn mismatched_schema_is_rejected() {
    let trace = MemoryTrace::new();
    let requested = vec!["instructions".to_string()];
    let class = get_metric_class(&trace, &requested, &FakeProvider);

    let pid = std::process::id() as libc::pid_t;
    // Group claims three counters but the class only has room for one.
    let group = FakeGroup::new(3, vec![]);
    let _ = CounterRecorder::with_group(pid, pid, &trace, class, Scope::Thread(pid), group);
}
