//! Host CPU topology.
//!
//! Recorders take a [`Topology`] at construction instead of consulting a
//! process-wide registry, so tests can hand them a fake host.

use std::fs;
use std::io;

/// Identifier of one logical CPU.
pub type CpuId = usize;

/// Ordered set of CPUs available for recording.
#[derive(Debug, Clone)]
pub struct Topology {
    cpus: Vec<CpuId>,
}

impl Topology {
    pub fn new(mut cpus: Vec<CpuId>) -> Self {
        cpus.sort_unstable();
        cpus.dedup();
        Self { cpus }
    }

    /// Read the online CPU set of the running host.
    pub fn host() -> io::Result<Self> {
        let list = fs::read_to_string("/sys/devices/system/cpu/online")?;
        parse_cpu_list(list.trim())
            .map(Self::new)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn cpus(&self) -> &[CpuId] {
        &self.cpus
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }
}

/// Parse kernel CPU-list syntax ("0-3,8-11,13") into CPU IDs.
pub fn parse_cpu_list(s: &str) -> Result<Vec<CpuId>, String> {
    fn cpu_number(token: &str) -> Result<CpuId, String> {
        token
            .trim()
            .parse()
            .map_err(|_| format!("'{token}' is not a CPU number"))
    }

    let mut cpus = Vec::new();
    for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (cpu_number(lo)?, cpu_number(hi)?);
                if hi < lo {
                    return Err(format!("descending CPU range {lo}-{hi}"));
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(cpu_number(entry)?),
        }
    }

    Ok(cpus)
}
