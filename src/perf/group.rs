//! Grouped hardware counters.
//!
//! All counters of one thread are opened as a single perf event group and
//! read with one read(2), so the `time_enabled`/`time_running`
//! multiplexing bookkeeping stays consistent with the counter values.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use perf_event_open_sys as sys;
use tracing::debug;

use crate::perf::event::EventDescriptor;

/// One grouped read: counter values in open order plus scheduling
/// bookkeeping. `time_running <= time_enabled` always.
#[derive(Debug, Clone, Default)]
pub struct GroupReading {
    pub values: Vec<u64>,
    pub time_enabled: u64,
    pub time_running: u64,
}

/// The active hardware counter set for one thread or process.
pub trait CounterGroup: Send {
    /// Number of counters in the group.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read every counter in the group at once.
    fn read(&mut self) -> io::Result<GroupReading>;
}

/// perf_event_open-backed counter group.
pub struct PerfCounterGroup {
    leader: OwnedFd,
    siblings: Vec<OwnedFd>,
    /// Kernel read layout: nr, time_enabled, time_running, value * nr.
    buf: Vec<u64>,
}

impl PerfCounterGroup {
    /// Open one counter per descriptor for the given thread, grouped
    /// under the first, and enable the whole group.
    pub fn open(tid: libc::pid_t, events: &[EventDescriptor]) -> io::Result<Self> {
        let (first, rest) = events.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "counter group needs at least one event")
        })?;

        let leader = open_one(tid, first, -1)?;
        let mut siblings = Vec::with_capacity(rest.len());
        for event in rest {
            siblings.push(open_one(tid, event, leader.as_raw_fd())?);
        }

        let rc = unsafe { sys::ioctls::ENABLE(leader.as_raw_fd(), sys::bindings::PERF_IOC_FLAG_GROUP) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        debug!(tid, counters = events.len(), "counter group enabled");

        let buf = vec![0u64; 3 + events.len()];
        Ok(Self {
            leader,
            siblings,
            buf,
        })
    }
}

fn open_one(
    tid: libc::pid_t,
    event: &EventDescriptor,
    group_fd: libc::c_int,
) -> io::Result<OwnedFd> {
    let mut attr = sys::bindings::perf_event_attr {
        size: mem::size_of::<sys::bindings::perf_event_attr>() as u32,
        type_: event.ty,
        config: event.config,
        read_format: (sys::bindings::PERF_FORMAT_GROUP
            | sys::bindings::PERF_FORMAT_TOTAL_TIME_ENABLED
            | sys::bindings::PERF_FORMAT_TOTAL_TIME_RUNNING) as u64,
        ..sys::bindings::perf_event_attr::default()
    };
    attr.__bindgen_anon_3.config1 = event.config1;
    // Members start disabled; the group is enabled through its leader so
    // all counters cover the same span.
    attr.set_disabled(1);

    let fd = unsafe {
        sys::perf_event_open(
            &mut attr,
            tid,
            -1,
            group_fd,
            sys::bindings::PERF_FLAG_FD_CLOEXEC.into(),
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

impl CounterGroup for PerfCounterGroup {
    fn len(&self) -> usize {
        self.siblings.len() + 1
    }

    fn read(&mut self) -> io::Result<GroupReading> {
        let n = self.len();
        let bytes = (3 + n) * mem::size_of::<u64>();
        let rc = unsafe {
            libc::read(
                self.leader.as_raw_fd(),
                self.buf.as_mut_ptr() as *mut libc::c_void,
                bytes,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if (rc as usize) < bytes {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short counter group read",
            ));
        }

        Ok(GroupReading {
            values: self.buf[3..3 + n].to_vec(),
            time_enabled: self.buf[1],
            time_running: self.buf[2],
        })
    }
}
