use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::io::AsRawFd;

use crate::config::Topology;
use crate::error::{Result, SliceMapError};

/// Privileged register access for one socket
///
/// All CHA and U-box registers of a socket are reachable through any logical
/// CPU of that socket, so one channel per socket is enough.
pub trait RegisterChannel {
    fn read(&self, addr: u64) -> Result<u64>;
    fn write(&self, addr: u64, value: u64) -> Result<()>;
}

pub struct MsrHandle {
    file: Mutex<File>,
    cpu_id: u32,
}

impl MsrHandle {
    pub fn new(cpu: u32) -> Result<Self> {
        let file = slicemap_raw::open_msr(cpu)?;

        tracing::info!("Opened MSR handle {} for core {}", file.as_raw_fd(), cpu);

        Ok(Self {
            file: Mutex::new(file),
            cpu_id: cpu,
        })
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }
}

impl RegisterChannel for MsrHandle {
    fn read(&self, addr: u64) -> Result<u64> {
        let mut file = self.file.lock();
        let value = slicemap_raw::read_msr(&mut file, self.cpu_id, addr)?;
        tracing::trace!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(value)
    }

    fn write(&self, addr: u64, value: u64) -> Result<()> {
        let mut file = self.file.lock();
        slicemap_raw::write_msr(&mut file, self.cpu_id, addr, value)?;
        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} <- 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(())
    }
}

/// One privileged channel per socket under measurement
#[derive(Default)]
pub struct SocketChannels {
    channels: BTreeMap<u32, Box<dyn RegisterChannel>>,
}

impl SocketChannels {
    /// Open the MSR device of each socket's representative CPU
    pub fn open(topology: &Topology) -> Result<Self> {
        let mut channels = Self::default();
        for socket in topology.socket_ids() {
            let cpu = topology.representative_cpu(socket).ok_or_else(|| {
                SliceMapError::MsrError(format!("Socket {socket} has no online CPU"))
            })?;
            channels.insert(socket, Box::new(MsrHandle::new(cpu)?));
        }
        Ok(channels)
    }

    pub fn insert(&mut self, socket: u32, channel: Box<dyn RegisterChannel>) {
        self.channels.insert(socket, channel);
    }

    pub fn get(&self, socket: u32) -> Result<&dyn RegisterChannel> {
        self.channels
            .get(&socket)
            .map(|c| c.as_ref())
            .ok_or_else(|| SliceMapError::MsrError(format!("No channel open for socket {socket}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &dyn RegisterChannel)> {
        self.channels.iter().map(|(&s, c)| (s, c.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::SimulatedUncore;

    #[test]
    fn test_missing_socket_channel() {
        let channels = SocketChannels::default();
        assert!(channels.is_empty());
        assert!(matches!(channels.get(1), Err(SliceMapError::MsrError(_))));
    }

    #[test]
    fn test_channels_iterate_in_socket_order() {
        let uncore = SimulatedUncore::new(4, |_, _| 0);
        let mut channels = SocketChannels::default();
        channels.insert(1, Box::new(uncore.channel()));
        channels.insert(0, Box::new(uncore.channel()));
        let sockets: Vec<u32> = channels.iter().map(|(s, _)| s).collect();
        assert_eq!(sockets, vec![0, 1]);
        assert_eq!(channels.len(), 2);
    }
}
