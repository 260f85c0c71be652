use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SliceMapError {
    #[error("MSR operation failed: {0}")]
    MsrError(String),

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("Huge page allocation failed: {0}")]
    AllocationError(String),

    #[error("Unsupported processor: CPUID signature 0x{signature:08x} ({model})")]
    UnsupportedProcessor { signature: u32, model: &'static str },

    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Mapping file {path} I/O failed: {source}")]
    CacheIo { path: PathBuf, source: io::Error },

    #[error("Mapping file {path} is {actual} bytes, expected {expected}; remove or repair it by hand")]
    CacheIntegrity {
        path: PathBuf,
        actual: u64,
        expected: u64,
    },

    #[error("No good results for line {line} of page 0x{paddr:012x} after {attempts} tries and {backoffs} backoffs")]
    ProbeExhausted {
        paddr: u64,
        line: usize,
        attempts: u32,
        backoffs: u32,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

impl From<slicemap_raw::MsrError> for SliceMapError {
    fn from(e: slicemap_raw::MsrError) -> Self {
        SliceMapError::MsrError(e.to_string())
    }
}

impl SliceMapError {
    /// Process exit status for each fatal class
    pub fn exit_code(&self) -> u8 {
        match self {
            SliceMapError::UnsupportedProcessor { .. }
            | SliceMapError::UnsupportedArchitecture(_)
            | SliceMapError::InvalidConfiguration(_) => 1,
            SliceMapError::MsrError(_)
            | SliceMapError::AffinityError(_)
            | SliceMapError::AllocationError(_)
            | SliceMapError::IoError(_)
            | SliceMapError::NixError(_)
            | SliceMapError::PrometheusError(_) => 3,
            SliceMapError::CacheIo { .. } => 4,
            SliceMapError::CacheIntegrity { .. } => 5,
            SliceMapError::ProbeExhausted { .. } => 101,
        }
    }
}

pub type Result<T> = std::result::Result<T, SliceMapError>;
