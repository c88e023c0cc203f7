//! Raw media-data regions and the bounded window cache used to serve sample
//! bytes without re-mapping the backing store on every access.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex};

/// Default window length: enough to amortize mapping without pinning large
/// spans of the source.
pub const DEFAULT_WINDOW_LEN: u64 = 10 * 1024 * 1024;

/// Default bound on cached windows per track.
pub const DEFAULT_MAX_WINDOWS: usize = 8;

/// A media-data payload left in the backing store.
///
/// `data` is populated only when the source could not seek (or the region was
/// nested inside an already-buffered container); otherwise the region is just
/// a byte window `[start, start+len)` into the backing store, which the
/// caller must keep alive and unmodified. The encoded header bytes are kept
/// so window creation can re-read and compare them, catching a caller that
/// rewrote the store underneath us.
#[derive(Debug, Clone)]
pub struct MediaRegion {
    /// Absolute offset of the payload (not the header) in the source.
    pub start: u64,
    pub len: u64,
    pub header_start: u64,
    pub header_bytes: Vec<u8>,
    pub data: Option<Arc<[u8]>>,
}

impl MediaRegion {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset >= self.start && offset + size <= self.end()
    }
}

/// Where the parsed source's bytes live for later retrieval.
#[derive(Clone)]
pub enum Backing {
    /// Whole source held in memory.
    Buffer(Arc<[u8]>),
    /// Seekable file; windows are memory-mapped on demand.
    File(Arc<File>),
    /// Stream-parsed: every media region carries its own buffer.
    Detached,
}

impl std::fmt::Debug for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::Buffer(b) => write!(f, "Buffer({} bytes)", b.len()),
            Backing::File(_) => write!(f, "File"),
            Backing::Detached => write!(f, "Detached"),
        }
    }
}

impl Backing {
    /// Copy `len` bytes at absolute `offset` out of the backing store.
    /// File backings go through a transient memory map.
    fn fetch(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        match self {
            Backing::Buffer(buf) => {
                let start = offset as usize;
                let end = start
                    .checked_add(len as usize)
                    .filter(|&e| e <= buf.len())
                    .ok_or_else(|| Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "window past end of buffer",
                    )))?;
                Ok(buf[start..end].to_vec())
            }
            Backing::File(file) => {
                if len == 0 {
                    return Ok(Vec::new());
                }
                // Safety: the caller contract is that the file is kept alive
                // and unmodified for the lifetime of the parse; the map is
                // copied out before returning.
                let map = unsafe {
                    memmap2::MmapOptions::new()
                        .offset(offset)
                        .len(len as usize)
                        .map(&**file)?
                };
                Ok(map.to_vec())
            }
            Backing::Detached => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no backing store attached",
            ))),
        }
    }

    /// Re-read a region's header bytes and compare against what was parsed.
    pub fn verify_region(&self, region: &MediaRegion) -> Result<()> {
        if region.data.is_some() || matches!(self, Backing::Detached) {
            return Ok(());
        }
        let now = self.fetch(region.header_start, region.header_bytes.len() as u64)?;
        if now != region.header_bytes {
            return Err(Error::BackingStoreChanged {
                offset: region.header_start,
            });
        }
        Ok(())
    }

    /// Copy a window out of a region, verifying the region header first for
    /// store-backed regions.
    pub fn fetch_region(&self, region: &MediaRegion, offset: u64, len: u64) -> Result<Vec<u8>> {
        match &region.data {
            Some(buf) => {
                let rel = (offset - region.start) as usize;
                Ok(buf[rel..rel + len as usize].to_vec())
            }
            None => {
                self.verify_region(region)?;
                self.fetch(offset, len)
            }
        }
    }
}

#[derive(Debug)]
struct Window {
    start: u64,
    data: Vec<u8>,
}

impl Window {
    fn covers(&self, offset: u64, size: u64) -> bool {
        offset >= self.start && offset + size <= self.start + self.data.len() as u64
    }
}

/// Bounded set of recently materialized windows, keyed by start offset.
///
/// One coarse lock around lookup and insert; access is read-mostly and
/// eviction only ever forces a refetch, never loses data.
#[derive(Debug)]
pub struct WindowCache {
    window_len: u64,
    max_windows: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default, Debug)]
struct CacheInner {
    windows: HashMap<u64, Arc<Window>>,
    /// Insertion order, oldest first.
    order: Vec<u64>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_WINDOW_LEN, DEFAULT_MAX_WINDOWS)
    }

    pub fn with_limits(window_len: u64, max_windows: usize) -> Self {
        Self {
            window_len,
            max_windows: max_windows.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Serve `[offset, offset+size)` from a cached window, creating one
    /// bounded window on miss: `min(window_len, region end - offset)`, grown
    /// to the sample length for oversized samples.
    pub fn read(
        &self,
        backing: &Backing,
        region: &MediaRegion,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();

        let hit = inner
            .windows
            .values()
            .find(|w| w.covers(offset, size))
            .cloned();
        let window = match hit {
            Some(w) => w,
            None => {
                let len = self.window_len.min(region.end() - offset).max(size);
                let data = backing.fetch_region(region, offset, len)?;
                let w = Arc::new(Window {
                    start: offset,
                    data,
                });
                if inner.windows.len() >= self.max_windows {
                    let oldest = inner.order.remove(0);
                    inner.windows.remove(&oldest);
                }
                inner.windows.insert(offset, w.clone());
                inner.order.push(offset);
                w
            }
        };

        let rel = (offset - window.start) as usize;
        Ok(window.data[rel..rel + size as usize].to_vec())
    }

    /// Drop every cached window. Retrieval after this refetches lazily.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.windows.clear();
        inner.order.clear();
    }

    pub fn cached_windows(&self) -> usize {
        self.inner.lock().unwrap().windows.len()
    }
}

impl Default for WindowCache {
    fn default() -> Self {
        Self::new()
    }
}
