//! MSR (Model-Specific Register) read/write primitives
//!
//! This module provides low-level MSR access on an already opened
//! `/dev/cpu/*/msr` device. Handle caching and per-socket channels live in
//! slicemap-agent.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device for CPU {cpu}: {source}")]
    OpenFailed { cpu: u32, source: std::io::Error },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to seek to MSR 0x{msr:X} on CPU {cpu}: {source}")]
    SeekFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },
}

/// Open the MSR device of one logical CPU for reading and writing
///
/// Writes are synchronous (`O_SYNC`) so that a counter programmed right before
/// a measurement is live when the first snapshot is taken.
///
/// # Errors
///
/// Fails if the `msr` kernel module is not loaded or the caller lacks
/// root/CAP_SYS_RAWIO.
pub fn open_msr(cpu: u32) -> Result<File> {
    let path = format!("/dev/cpu/{cpu}/msr");
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(&path)
        .map_err(|e| MsrError::OpenFailed { cpu, source: e })
}

/// Read a 64-bit value from an MSR
///
/// # Arguments
///
/// * `dev` - MSR device opened with [`open_msr`]
/// * `cpu` - CPU the device belongs to (error reporting only)
/// * `msr` - MSR address (e.g., 0xE08 for CHA 0 counter 0 on Skylake-SP)
///
/// # Example
///
/// ```ignore
/// use slicemap_raw::{open_msr, read_msr};
///
/// let mut dev = open_msr(0)?;
/// let value = read_msr(&mut dev, 0, 0xE08)?;
/// println!("MSR 0xE08 = 0x{:016X}", value);
/// ```
pub fn read_msr(dev: &mut File, cpu: u32, msr: u64) -> Result<u64> {
    dev.seek(SeekFrom::Start(msr))
        .map_err(|e| MsrError::SeekFailed {
            cpu,
            msr,
            source: e,
        })?;

    let mut buffer = [0u8; 8];
    dev.read_exact(&mut buffer)
        .map_err(|e| MsrError::ReadFailed {
            cpu,
            msr,
            source: e,
        })?;

    Ok(u64::from_le_bytes(buffer))
}

/// Write a 64-bit value to an MSR
///
/// # Safety
///
/// Writing incorrect values to MSRs can cause system instability or crashes.
/// Only addresses produced by an [`AddressingScheme`](crate::AddressingScheme)
/// resolved for the running processor should be written.
pub fn write_msr(dev: &mut File, cpu: u32, msr: u64, value: u64) -> Result<()> {
    dev.seek(SeekFrom::Start(msr))
        .map_err(|e| MsrError::SeekFailed {
            cpu,
            msr,
            source: e,
        })?;

    dev.write_all(&value.to_le_bytes())
        .map_err(|e| MsrError::WriteFailed {
            cpu,
            msr,
            source: e,
        })?;

    Ok(())
}
