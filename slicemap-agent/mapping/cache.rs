// Per-page slice map files keyed by physical base address

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SliceMapError};
use crate::mapping::{SliceMap, LINES_PER_PAGE};

pub struct MappingCache {
    dir: PathBuf,
}

impl MappingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(paddr: u64) -> String {
        format!("PADDR_0x{paddr:012x}.map")
    }

    pub fn path_for(&self, paddr: u64) -> PathBuf {
        self.dir.join(Self::file_name(paddr))
    }

    /// Previously computed map of a page, `None` when no file exists
    ///
    /// A file of the wrong size is never repaired or recomputed.
    pub fn load(&self, paddr: u64) -> Result<Option<SliceMap>> {
        let path = self.path_for(paddr);
        let expected = LINES_PER_PAGE as u64;
        let actual = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SliceMapError::CacheIo { path, source }),
        };
        if actual != expected {
            return Err(SliceMapError::CacheIntegrity {
                path,
                actual,
                expected,
            });
        }

        let bytes = fs::read(&path).map_err(|source| SliceMapError::CacheIo {
            path: path.clone(),
            source,
        })?;
        let map = SliceMap::from_bytes(paddr, &bytes).ok_or(SliceMapError::CacheIntegrity {
            path: path.clone(),
            actual: bytes.len() as u64,
            expected,
        })?;

        tracing::debug!("Loaded mapping file {}", path.display());
        Ok(Some(map))
    }

    /// Persist a complete map with a single rename over the key
    pub fn store(&self, map: &SliceMap) -> Result<PathBuf> {
        let path = self.path_for(map.paddr());
        if !map.is_complete() {
            return Err(SliceMapError::CacheIo {
                path,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("refusing to persist map with {} unmapped lines", map.unmapped_lines()),
                ),
            });
        }

        let tmp = path.with_extension("map.tmp");
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&map.to_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        if let Err(source) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(SliceMapError::CacheIo { path, source });
        }

        tracing::info!("Wrote mapping file {}", path.display());
        Ok(path)
    }
}
