//! Trace timestamps.

/// A point in time on the monotonic-raw clock, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub fn nanos(&self) -> u64 {
        self.0
    }
}

/// Read the current time.
///
/// Recorders capture this once per emission step, strictly before the
/// corresponding counter reads. CLOCK_MONOTONIC_RAW keeps per-recorder
/// sample ordering immune to NTP slew.
pub fn now() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // Cannot fail for a supported clock id and a valid timespec pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
    }
    Timestamp(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_non_decreasing() {
        let a = now();
        let b = now();
        assert!(a <= b);
    }

    #[test]
    fn nanos_round_trip() {
        let t = Timestamp::from_nanos(12345);
        assert_eq!(t.nanos(), 12345);
    }
}
