//! Counter event descriptions and name resolution.

use perf_event_open_sys::bindings as sys;

use crate::error::{Error, Result};

/// Raw identity of one counter event, as passed to perf_event_open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub name: String,
    pub ty: u32,
    pub config: u64,
    pub config1: u64,
}

impl EventDescriptor {
    pub fn new(name: &str, ty: u32, config: u64) -> Self {
        Self {
            name: name.to_string(),
            ty,
            config,
            config1: 0,
        }
    }
}

/// Resolves event names to descriptors.
///
/// Injected at recorder construction so tests can supply a fake catalog;
/// the host's full event enumeration lives outside this crate.
pub trait EventProvider {
    /// Resolve a named event, failing with [`Error::UnknownEvent`] for
    /// names the host does not know.
    fn get_event_by_name(&self, name: &str) -> Result<EventDescriptor>;

    fn has_event(&self, name: &str) -> bool {
        self.get_event_by_name(name).is_ok()
    }
}

/// The kernel's generalized predefined events.
///
/// Covers the common hardware and software events every perf-capable
/// kernel exposes; PMU-specific events come from a richer provider.
#[derive(Debug, Default)]
pub struct PredefinedEvents;

impl EventProvider for PredefinedEvents {
    fn get_event_by_name(&self, name: &str) -> Result<EventDescriptor> {
        let hw = |config: u32| EventDescriptor::new(name, sys::PERF_TYPE_HARDWARE, config as u64);
        let sw = |config: u32| EventDescriptor::new(name, sys::PERF_TYPE_SOFTWARE, config as u64);

        let desc = match name {
            "cpu-cycles" | "cycles" => hw(sys::PERF_COUNT_HW_CPU_CYCLES),
            "instructions" => hw(sys::PERF_COUNT_HW_INSTRUCTIONS),
            "cache-references" => hw(sys::PERF_COUNT_HW_CACHE_REFERENCES),
            "cache-misses" => hw(sys::PERF_COUNT_HW_CACHE_MISSES),
            "branch-instructions" | "branches" => hw(sys::PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
            "branch-misses" => hw(sys::PERF_COUNT_HW_BRANCH_MISSES),
            "bus-cycles" => hw(sys::PERF_COUNT_HW_BUS_CYCLES),
            "ref-cycles" => hw(sys::PERF_COUNT_HW_REF_CPU_CYCLES),
            "cpu-clock" => sw(sys::PERF_COUNT_SW_CPU_CLOCK),
            "task-clock" => sw(sys::PERF_COUNT_SW_TASK_CLOCK),
            "page-faults" | "faults" => sw(sys::PERF_COUNT_SW_PAGE_FAULTS),
            "context-switches" | "cs" => sw(sys::PERF_COUNT_SW_CONTEXT_SWITCHES),
            "cpu-migrations" | "migrations" => sw(sys::PERF_COUNT_SW_CPU_MIGRATIONS),
            "major-faults" => sw(sys::PERF_COUNT_SW_PAGE_FAULTS_MAJ),
            "minor-faults" => sw(sys::PERF_COUNT_SW_PAGE_FAULTS_MIN),
            _ => return Err(Error::UnknownEvent(name.to_string())),
        };
        Ok(desc)
    }
}

fn hw_cache(name: &str, cache: u32, op: u32, result: u32) -> EventDescriptor {
    EventDescriptor::new(
        name,
        sys::PERF_TYPE_HW_CACHE,
        cache as u64 | (op as u64) << 8 | (result as u64) << 16,
    )
}

/// The default memory-event counter set for the host, in the fixed order
/// they appear in the metric class.
pub fn default_mem_events() -> Vec<EventDescriptor> {
    vec![
        hw_cache(
            "L1-dcache-loads",
            sys::PERF_COUNT_HW_CACHE_L1D,
            sys::PERF_COUNT_HW_CACHE_OP_READ,
            sys::PERF_COUNT_HW_CACHE_RESULT_ACCESS,
        ),
        hw_cache(
            "L1-dcache-load-misses",
            sys::PERF_COUNT_HW_CACHE_L1D,
            sys::PERF_COUNT_HW_CACHE_OP_READ,
            sys::PERF_COUNT_HW_CACHE_RESULT_MISS,
        ),
        hw_cache(
            "LLC-loads",
            sys::PERF_COUNT_HW_CACHE_LL,
            sys::PERF_COUNT_HW_CACHE_OP_READ,
            sys::PERF_COUNT_HW_CACHE_RESULT_ACCESS,
        ),
        hw_cache(
            "LLC-load-misses",
            sys::PERF_COUNT_HW_CACHE_LL,
            sys::PERF_COUNT_HW_CACHE_OP_READ,
            sys::PERF_COUNT_HW_CACHE_RESULT_MISS,
        ),
    ]
}
