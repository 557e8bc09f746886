//! Metric schema and trace-writer contracts.
//!
//! The engine consumes these from the surrounding tool: a [`Trace`] hands
//! out writers and scopes, the schema types describe what each emitted
//! sample carries. Nothing here performs trace serialization.

use crate::time::Timestamp;
use crate::topology::CpuId;

/// How consecutive values of one metric member relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricMode {
    /// Value accumulates since the start of recording.
    AccumulatedStart,
    /// Value holds until the next event.
    AbsoluteLast,
    /// Value applies from this event onward.
    AbsoluteNext,
}

/// Value type of one metric member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Double,
    Int64,
    Uint64,
}

/// One named, typed slot in a metric class.
#[derive(Debug, Clone)]
pub struct MetricMember {
    pub name: String,
    pub description: String,
    pub mode: MetricMode,
    pub ty: MetricType,
    pub unit: String,
}

/// Ordered, named, typed schema of the values a metric event carries.
///
/// Member order is fixed once built and must match the order values are
/// populated into each emitted event.
#[derive(Debug, Clone, Default)]
pub struct MetricClass {
    members: Vec<MetricMember>,
}

impl MetricClass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&mut self, member: MetricMember) {
        self.members.push(member);
    }

    pub fn members(&self) -> &[MetricMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A single sampled value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Double(f64),
    Int64(i64),
    Uint64(u64),
}

/// Node in the system tree a metric stream is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Cpu(CpuId),
    Thread(libc::pid_t),
    Process(libc::pid_t),
}

/// Identity of a writer's location within the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location(pub String);

/// Binds a metric class to a concrete trace location and scope.
#[derive(Debug, Clone)]
pub struct MetricInstance {
    class: MetricClass,
    location: Location,
    scope: Scope,
}

impl MetricInstance {
    pub fn new(class: MetricClass, location: Location, scope: Scope) -> Self {
        Self {
            class,
            location,
            scope,
        }
    }

    pub fn metric_class(&self) -> &MetricClass {
        &self.class
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

/// One timestamped sample carrying exactly one value per class member.
#[derive(Debug, Clone)]
pub struct MetricEvent {
    pub time: Timestamp,
    pub values: Vec<MetricValue>,
}

impl MetricEvent {
    pub fn new(time: Timestamp, values: Vec<MetricValue>) -> Self {
        Self { time, values }
    }
}

/// Append-only sink for the metric events of one instance.
///
/// Each recorder exclusively owns its writer; writers are never shared
/// between recorder instances or threads.
pub trait Writer: Send {
    /// Trace location this writer is bound to.
    fn location(&self) -> Location;

    /// Append one metric event.
    fn write(&mut self, event: MetricEvent);
}

/// Handle to the surrounding trace.
///
/// The default implementations construct the engine-local schema types; a
/// trace backend overrides them to intern definitions in its own format.
pub trait Trace {
    /// Allocate a writer for the named metric stream.
    fn metric_writer(&self, name: &str) -> Box<dyn Writer>;

    fn metric_class(&self) -> MetricClass {
        MetricClass::new()
    }

    fn metric_member(
        &self,
        name: &str,
        description: &str,
        mode: MetricMode,
        ty: MetricType,
        unit: &str,
    ) -> MetricMember {
        MetricMember {
            name: name.to_string(),
            description: description.to_string(),
            mode,
            ty,
            unit: unit.to_string(),
        }
    }

    fn metric_instance(
        &self,
        class: MetricClass,
        location: Location,
        scope: Scope,
    ) -> MetricInstance {
        MetricInstance::new(class, location, scope)
    }

    fn system_tree_cpu_node(&self, cpu: CpuId) -> Scope {
        Scope::Cpu(cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_preserves_member_order() {
        let mut class = MetricClass::new();
        for name in ["a", "b", "c"] {
            class.add_member(MetricMember {
                name: name.to_string(),
                description: String::new(),
                mode: MetricMode::AccumulatedStart,
                ty: MetricType::Double,
                unit: "#".to_string(),
            });
        }
        let names: Vec<_> = class.members().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(class.len(), 3);
    }
}
