//! Per-CPU tracepoint event source.
//!
//! Each [`TracepointReader`] owns one perf fd with a memory-mapped ring
//! buffer. The fd is registered with the recorder's multiplexer; when it
//! becomes readable the reader drains the ring, decodes every sample's
//! raw payload against the event format, and writes one metric event per
//! sample.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use perf_event_open_sys as sys;
use tracing::{debug, warn};

use crate::error::Result;
use crate::time::Timestamp;
use crate::topology::CpuId;
use crate::trace::{
    MetricClass, MetricEvent, MetricInstance, MetricValue, Scope, Trace, Writer,
};

use super::format::{EventField, EventFormat};

/// Fill level of the ring buffer at which the fd is made readable.
const WAKEUP_FILL: f64 = 0.8;

/// A readable descriptor producing metric events when drained.
///
/// The recorder treats sources uniformly through this trait; tests drive
/// the recorder with scripted sources instead of live perf fds.
pub trait EventSource: Send {
    /// Descriptor to multiplex on.
    fn fd(&self) -> RawFd;

    /// Drain all pending data.
    fn read(&mut self) -> Result<()>;

    /// Stop event production and drain whatever is left.
    fn stop(&mut self) -> Result<()>;
}

impl EventSource for Box<dyn EventSource> {
    fn fd(&self) -> RawFd {
        (**self).fd()
    }

    fn read(&mut self) -> Result<()> {
        (**self).read()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Sample ring shared with the kernel: one metadata page followed by
/// `pages` data pages.
struct RingBuffer {
    base: *mut u8,
    len: usize,
    data_size: u64,
}

// The mapping is owned exclusively; the kernel side uses only the
// documented head/tail protocol.
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    fn map(fd: RawFd, pages: usize) -> io::Result<Self> {
        let page = page_size();
        let len = (pages + 1) * page;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            base: base as *mut u8,
            len,
            data_size: (pages * page) as u64,
        })
    }

    fn metadata(&self) -> *mut sys::bindings::perf_event_mmap_page {
        self.base as *mut sys::bindings::perf_event_mmap_page
    }

    fn head(&self) -> u64 {
        let head = unsafe { ptr::read_volatile(ptr::addr_of!((*self.metadata()).data_head)) };
        fence(Ordering::Acquire);
        head
    }

    fn tail(&self) -> u64 {
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.metadata()).data_tail)) }
    }

    fn advance_tail(&mut self, tail: u64) {
        fence(Ordering::Release);
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.metadata()).data_tail), tail) };
    }

    /// Copy `out.len()` bytes starting at ring position `pos`, handling
    /// wrap-around at the end of the data area.
    fn copy_out(&self, pos: u64, out: &mut [u8]) {
        let data = unsafe { self.base.add(page_size()) };
        let start = (pos % self.data_size) as usize;
        let first = out.len().min(self.data_size as usize - start);
        unsafe {
            ptr::copy_nonoverlapping(data.add(start), out.as_mut_ptr(), first);
            if first < out.len() {
                ptr::copy_nonoverlapping(data, out.as_mut_ptr().add(first), out.len() - first);
            }
        }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

/// Tracepoint source for one CPU.
pub struct TracepointReader {
    fd: OwnedFd,
    ring: RingBuffer,
    format: Arc<EventFormat>,
    writer: Box<dyn Writer>,
    instance: MetricInstance,
    values: Vec<MetricValue>,
    cpu: CpuId,
}

impl TracepointReader {
    /// Open the tracepoint on one CPU, map its ring, and enable it.
    pub fn open(
        cpu: CpuId,
        format: Arc<EventFormat>,
        mmap_pages: usize,
        trace: &dyn Trace,
        metric_class: MetricClass,
    ) -> Result<Self> {
        assert_eq!(
            metric_class.len(),
            format.fields().len(),
            "one metric member per tracepoint field"
        );

        let mut attr = sys::bindings::perf_event_attr {
            size: std::mem::size_of::<sys::bindings::perf_event_attr>() as u32,
            type_: sys::bindings::PERF_TYPE_TRACEPOINT,
            config: format.id(),
            sample_type: (sys::bindings::PERF_SAMPLE_RAW | sys::bindings::PERF_SAMPLE_TIME) as u64,
            ..sys::bindings::perf_event_attr::default()
        };
        attr.__bindgen_anon_1.sample_period = 1;
        attr.set_disabled(1);
        // Wake the poller on fill level rather than per sample.
        attr.set_watermark(1);
        attr.__bindgen_anon_2.wakeup_watermark =
            (WAKEUP_FILL * (mmap_pages * page_size()) as f64) as u32;

        let raw = unsafe {
            sys::perf_event_open(
                &mut attr,
                -1,
                cpu as libc::c_int,
                -1,
                sys::bindings::PERF_FLAG_FD_CLOEXEC.into(),
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let ring = RingBuffer::map(fd.as_raw_fd(), mmap_pages)?;

        let writer = trace.metric_writer(&format!(
            "tracepoint {} on CPU {cpu}",
            format.name()
        ));
        let location = writer.location();
        let values = vec![MetricValue::Int64(0); metric_class.len()];
        let instance = trace.metric_instance(metric_class, location, Scope::Cpu(cpu));

        let rc = unsafe { sys::ioctls::ENABLE(fd.as_raw_fd(), 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        debug!(cpu, event = format.name(), "tracepoint enabled");

        Ok(Self {
            fd,
            ring,
            format,
            writer,
            instance,
            values,
            cpu,
        })
    }

    fn handle_sample(&mut self, body: &[u8]) {
        // PERF_SAMPLE_TIME then PERF_SAMPLE_RAW: u64 time, u32 size,
        // size bytes of payload.
        if body.len() < 12 {
            warn!(cpu = self.cpu, "truncated sample record");
            return;
        }
        let time = u64::from_ne_bytes(body[0..8].try_into().unwrap());
        let size = u32::from_ne_bytes(body[8..12].try_into().unwrap()) as usize;
        let Some(payload) = body.get(12..12 + size) else {
            warn!(cpu = self.cpu, "raw payload shorter than its size field");
            return;
        };

        for (slot, field) in self.values.iter_mut().zip(self.format.fields()) {
            *slot = MetricValue::Int64(decode_field(payload, field));
        }
        self.writer
            .write(MetricEvent::new(Timestamp::from_nanos(time), self.values.clone()));
    }

    pub fn metric_class(&self) -> &MetricClass {
        self.instance.metric_class()
    }
}

/// Decode one integer field of a raw tracepoint payload. Non-integer
/// sizes (strings, arrays) decode as zero.
fn decode_field(payload: &[u8], field: &EventField) -> i64 {
    let Some(bytes) = payload.get(field.offset()..field.offset() + field.size()) else {
        warn!(field = field.name(), "field outside raw payload");
        return 0;
    };
    match (field.size(), field.signed()) {
        (1, true) => i8::from_ne_bytes(bytes.try_into().unwrap()) as i64,
        (1, false) => u8::from_ne_bytes(bytes.try_into().unwrap()) as i64,
        (2, true) => i16::from_ne_bytes(bytes.try_into().unwrap()) as i64,
        (2, false) => u16::from_ne_bytes(bytes.try_into().unwrap()) as i64,
        (4, true) => i32::from_ne_bytes(bytes.try_into().unwrap()) as i64,
        (4, false) => u32::from_ne_bytes(bytes.try_into().unwrap()) as i64,
        (8, _) => i64::from_ne_bytes(bytes.try_into().unwrap()),
        _ => 0,
    }
}

impl EventSource for TracepointReader {
    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn read(&mut self) -> Result<()> {
        let head = self.ring.head();
        let mut tail = self.ring.tail();

        let mut header_buf = [0u8; std::mem::size_of::<sys::bindings::perf_event_header>()];
        while tail < head {
            self.ring.copy_out(tail, &mut header_buf);
            let ty = u32::from_ne_bytes(header_buf[0..4].try_into().unwrap());
            let record_size = u16::from_ne_bytes(header_buf[6..8].try_into().unwrap()) as usize;
            if record_size < header_buf.len() {
                warn!(cpu = self.cpu, record_size, "undersized record header");
                break;
            }

            if ty == sys::bindings::PERF_RECORD_SAMPLE {
                let mut body = vec![0u8; record_size - header_buf.len()];
                self.ring
                    .copy_out(tail + header_buf.len() as u64, &mut body);
                self.handle_sample(&body);
            }

            tail += record_size as u64;
        }

        self.ring.advance_tail(tail);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let rc = unsafe { sys::ioctls::DISABLE(self.fd.as_raw_fd(), 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // Final drain so nothing written before the disable is lost.
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(offset: usize, size: usize, signed: bool) -> EventField {
        EventField::new("f".to_string(), offset, size, signed)
    }

    #[test]
    fn decodes_widths_and_signs() {
        let payload = [0xffu8, 0xff, 0xff, 0xff, 0x2a, 0, 0, 0];
        assert_eq!(decode_field(&payload, &field(0, 1, true)), -1);
        assert_eq!(decode_field(&payload, &field(0, 1, false)), 255);
        assert_eq!(decode_field(&payload, &field(0, 2, true)), -1);
        assert_eq!(decode_field(&payload, &field(0, 2, false)), 65535);
        assert_eq!(decode_field(&payload, &field(0, 4, true)), -1);
        assert_eq!(decode_field(&payload, &field(0, 4, false)), u32::MAX as i64);
        assert_eq!(decode_field(&payload, &field(4, 4, false)), 42);
    }

    #[test]
    fn out_of_range_and_odd_sizes_decode_as_zero() {
        let payload = [1u8, 2, 3, 4];
        assert_eq!(decode_field(&payload, &field(2, 4, false)), 0);
        assert_eq!(decode_field(&payload, &field(0, 3, false)), 0);
        assert_eq!(decode_field(&payload, &field(0, 16, true)), 0);
    }
}
