//! MSR-backed device.
//!
//! Reads per-core model-specific registers through the msr kernel
//! module's `/dev/cpu/<n>/msr` interface. Requires the module to be
//! loaded and read permission on the device node.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use crate::metric::device::{ConfigurationItem, Device};
use crate::topology::CpuId;

pub struct MsrDevice {
    cpu: CpuId,
    file: File,
}

impl MsrDevice {
    pub fn open(cpu: CpuId) -> io::Result<Self> {
        let path = PathBuf::from(format!("/dev/cpu/{cpu}/msr"));
        let file = File::open(&path)?;
        Ok(Self { cpu, file })
    }
}

impl Device for MsrDevice {
    fn cpu(&self) -> CpuId {
        self.cpu
    }

    fn read(&mut self, item: &ConfigurationItem) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        // The msr device addresses registers by file offset.
        self.file.read_exact_at(&mut buf, item.register)?;
        Ok(u64::from_ne_bytes(buf))
    }
}
