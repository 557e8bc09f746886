//! Kernel tracepoint event formats.
//!
//! Parses the field description the kernel exposes under
//! `/sys/kernel/debug/tracing/events/<group>/<name>/format` into typed
//! field layouts used to decode raw records.

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

const BASE_PATH: &str = "/sys/kernel/debug/tracing/events";

/// One structured field of a tracepoint record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventField {
    name: String,
    offset: usize,
    size: usize,
    signed: bool,
}

impl EventField {
    pub fn new(name: String, offset: usize, size: usize, signed: bool) -> Self {
        Self {
            name,
            offset,
            size,
            signed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn signed(&self) -> bool {
        self.signed
    }
}

/// Field layout and perf config id of one tracepoint event.
///
/// Immutable once built; shared by reference across all per-CPU sources
/// of the same event.
#[derive(Debug, Clone)]
pub struct EventFormat {
    name: String,
    id: u64,
    common_fields: Vec<EventField>,
    fields: Vec<EventField>,
}

impl EventFormat {
    /// Resolve a tracepoint by name. Both `group:name` and `group/name`
    /// are accepted.
    pub fn resolve(name: &str) -> Result<Self> {
        let normalized = name.replace(':', "/");
        if normalized.split('/').count() != 2 {
            return Err(Error::UnknownEvent(name.to_string()));
        }

        let path = PathBuf::from(BASE_PATH).join(&normalized).join("format");
        let text = fs::read_to_string(&path).map_err(|_| Error::UnknownEvent(name.to_string()))?;
        Self::parse(name, &text)
    }

    /// Parse the kernel's format-file text.
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut id = None;
        let mut common_fields = Vec::new();
        let mut fields = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("ID:") {
                let parsed = rest
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::InvalidFormat(format!("bad ID line for {name}")))?;
                id = Some(parsed);
            } else if line.starts_with("field:") {
                let field = parse_field_line(line).ok_or_else(|| {
                    Error::InvalidFormat(format!("bad field line for {name}: {line}"))
                })?;
                if field.name().starts_with("common_") {
                    common_fields.push(field);
                } else {
                    fields.push(field);
                }
            }
        }

        let id = id.ok_or_else(|| Error::InvalidFormat(format!("missing ID for {name}")))?;

        Ok(Self {
            name: name.to_string(),
            id,
            common_fields,
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// perf_event_open config value for this tracepoint.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Event-specific fields, in declaration order.
    pub fn fields(&self) -> &[EventField] {
        &self.fields
    }

    pub fn common_fields(&self) -> &[EventField] {
        &self.common_fields
    }
}

/// `field:unsigned short common_type; offset:0; size:2; signed:0;`
fn parse_field_line(line: &str) -> Option<EventField> {
    let mut name = None;
    let mut offset = None;
    let mut size = None;
    let mut signed = None;

    for part in line.split(';') {
        let part = part.trim();
        if let Some(decl) = part.strip_prefix("field:") {
            // The field name is the last token of the C declaration;
            // array suffixes like comm[16] are stripped.
            let ident = decl.split_whitespace().last()?;
            let ident = ident.split('[').next()?;
            name = Some(ident.to_string());
        } else if let Some(v) = part.strip_prefix("offset:") {
            offset = v.trim().parse().ok();
        } else if let Some(v) = part.strip_prefix("size:") {
            size = v.trim().parse().ok();
        } else if let Some(v) = part.strip_prefix("signed:") {
            signed = Some(v.trim() != "0");
        }
    }

    Some(EventField::new(name?, offset?, size?, signed?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHED_WAKEUP: &str = "\
name: sched_wakeup
ID: 310
format:
\tfield:unsigned short common_type;\toffset:0;\tsize:2;\tsigned:0;
\tfield:unsigned char common_flags;\toffset:2;\tsize:1;\tsigned:0;
\tfield:unsigned char common_preempt_count;\toffset:3;\tsize:1;\tsigned:0;
\tfield:int common_pid;\toffset:4;\tsize:4;\tsigned:1;

\tfield:char comm[16];\toffset:8;\tsize:16;\tsigned:1;
\tfield:pid_t pid;\toffset:24;\tsize:4;\tsigned:1;
\tfield:int prio;\toffset:28;\tsize:4;\tsigned:1;
\tfield:int target_cpu;\toffset:32;\tsize:4;\tsigned:1;

print fmt: \"comm=%s pid=%d prio=%d target_cpu=%03d\"
";

    #[test]
    fn parses_id_and_separates_common_fields() {
        let format = EventFormat::parse("sched:sched_wakeup", SCHED_WAKEUP).unwrap();
        assert_eq!(format.id(), 310);
        assert_eq!(format.common_fields().len(), 4);
        assert_eq!(format.fields().len(), 4);

        let pid = &format.fields()[1];
        assert_eq!(pid.name(), "pid");
        assert_eq!(pid.offset(), 24);
        assert_eq!(pid.size(), 4);
        assert!(pid.signed());
    }

    #[test]
    fn array_field_name_is_stripped() {
        let format = EventFormat::parse("sched:sched_wakeup", SCHED_WAKEUP).unwrap();
        let comm = &format.fields()[0];
        assert_eq!(comm.name(), "comm");
        assert_eq!(comm.size(), 16);
    }

    #[test]
    fn missing_id_is_invalid() {
        let text = "field:int x;\toffset:0;\tsize:4;\tsigned:1;\n";
        assert!(matches!(
            EventFormat::parse("x:y", text),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn malformed_field_line_is_invalid() {
        let text = "ID: 1\nfield:int x;\toffset:zero;\tsize:4;\tsigned:1;\n";
        assert!(matches!(
            EventFormat::parse("x:y", text),
            Err(Error::InvalidFormat(_))
        ));
    }
}
