//! ISO-BMFF box-tree engine: lazy parsing into a typed tree, byte-exact
//! re-serialization, and sample-to-byte-range resolution for flat and
//! fragmented files.

pub mod boxes;
pub mod codec;
pub mod error;
pub mod kinds;
pub mod mdat;
pub mod parser;
pub mod registry;
pub mod samples;
pub mod source;
pub mod util;
pub mod writer;

pub use boxes::{BoxFields, BoxHeader, BoxKey, BoxNode, FourCC, Payload};
pub use error::{Error, Result};
pub use mdat::{Backing, MediaRegion, WindowCache};
pub use registry::{KindContext, KindEntry, NodeClass, Registry};
pub use samples::{SampleInfo, Track};

use source::{SeekSource, StreamSource};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

/// A parsed source: the top-level box sequence in file order, the registry
/// that resolved it, and the backing store media-data regions point into.
#[derive(Debug)]
pub struct Mp4File {
    pub boxes: Vec<BoxNode>,
    registry: Registry,
    backing: Backing,
}

impl Mp4File {
    /// Parse a file on disk. The file stays open as the backing store for
    /// media-data windows; it must not be modified while this value lives.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, Registry::builtin())
    }

    pub fn open_with(path: impl AsRef<Path>, registry: Registry) -> Result<Self> {
        let file = File::open(path)?;
        let backing = Backing::File(Arc::new(file.try_clone()?));
        let mut src = SeekSource::new(file)?;
        let boxes = parser::parse_top(&mut src, &registry, true)?;
        Ok(Self {
            boxes,
            registry,
            backing,
        })
    }

    /// Parse an in-memory buffer; the buffer is kept as the backing store.
    pub fn parse_slice(data: impl Into<Arc<[u8]>>) -> Result<Self> {
        Self::parse_slice_with(data, Registry::builtin())
    }

    pub fn parse_slice_with(data: impl Into<Arc<[u8]>>, registry: Registry) -> Result<Self> {
        let data: Arc<[u8]> = data.into();
        let mut src = SeekSource::new(std::io::Cursor::new(&data[..]))?;
        let boxes = parser::parse_top(&mut src, &registry, true)?;
        Ok(Self {
            boxes,
            registry,
            backing: Backing::Buffer(data),
        })
    }

    /// Parse a forward-only stream. Size-to-end-of-stream boxes are a caller
    /// error here, and media-data payloads are buffered into the tree.
    pub fn parse_stream<R: Read>(reader: R) -> Result<Self> {
        Self::parse_stream_with(reader, Registry::builtin())
    }

    pub fn parse_stream_with<R: Read>(reader: R, registry: Registry) -> Result<Self> {
        let mut src = StreamSource::new(reader);
        let boxes = parser::parse_top(&mut src, &registry, false)?;
        Ok(Self {
            boxes,
            registry,
            backing: Backing::Detached,
        })
    }

    /// Serialize the tree back to bytes. An unmodified tree reproduces the
    /// parsed input byte for byte.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writer::write_tree(&self.boxes, &self.backing, out)
    }

    /// Recompute every declared size bottom-up after tree mutation.
    pub fn update_sizes(&mut self) {
        for b in &mut self.boxes {
            b.update_size();
        }
    }

    /// Descend a dotted path of four-character codes from the top level.
    pub fn find(&self, path: &str) -> Option<&BoxNode> {
        boxes::find_path(&self.boxes, path)
    }

    /// Resolve every track's sample index: classical tables and movie
    /// fragments, merged in offset order.
    pub fn tracks(&mut self) -> Result<Vec<Track>> {
        let Mp4File {
            boxes,
            registry,
            backing,
        } = self;
        samples::resolve_tracks(boxes, registry, backing)
    }

    /// Interpret every leaf payload in the tree. Payloads the registry
    /// cannot make sense of stay raw with a warning; unknown box types are
    /// not an error.
    pub fn interpret_all(&mut self) {
        fn walk(node: &mut BoxNode, registry: &Registry) {
            if let Err(e) = node.interpret(registry) {
                tracing::warn!(
                    typ = %node.header.typ,
                    offset = node.header.start,
                    error = %e,
                    "payload left uninterpreted"
                );
            }
            if let Some(children) = node.children_mut() {
                for c in children.iter_mut() {
                    walk(c, registry);
                }
            }
        }
        let Mp4File {
            boxes, registry, ..
        } = self;
        for b in boxes.iter_mut() {
            walk(b, registry);
        }
    }

    pub fn media_regions(&self) -> Vec<MediaRegion> {
        samples::collect_media_regions(&self.boxes)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }
}
