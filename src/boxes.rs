//! The box model: identity, header geometry with its recorded encoded form,
//! and the payload state a node moves through (raw bytes, interpreted fields,
//! children, or a never-materialized media-data region).

use crate::error::Result;
use crate::mdat::MediaRegion;
use crate::registry::Registry;
use std::any::Any;
use std::fmt;
use std::io::Write;

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub fn from_str(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() == 4 {
            Some(FourCC([b[0], b[1], b[2], b[3]]))
        } else {
            None
        }
    }

    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl serde::Serialize for FourCC {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}

/// Registry lookup identity: a plain four-character code, or the `uuid`
/// escape with its 16-byte extended type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxKey {
    FourCC(FourCC),
    Uuid([u8; 16]),
}

/// Box header as read from (or destined for) the stream.
///
/// `size` is always the resolved total size including the header, even when
/// the stream encoded it as 0 (to end of source) or via the 64-bit extension.
/// The encoded form actually used is recorded (`wide`, `to_eof`,
/// `header_size`) so an unmodified box re-serializes byte-exactly.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    pub typ: FourCC,
    pub uuid: Option<[u8; 16]>,
    pub size: u64,
    /// Header bytes as encoded: 8, 16, 24, or 32.
    pub header_size: u64,
    /// Absolute offset of the header start in the parsed source.
    pub start: u64,
    /// Encoded with the 64-bit size extension.
    pub wide: bool,
    /// Encoded as size32 == 0 (extends to end of source).
    pub to_eof: bool,
}

impl BoxHeader {
    /// Fresh header for a synthesized box; size is filled in by
    /// [`BoxNode::update_size`].
    pub fn synthesized(typ: FourCC, uuid: Option<[u8; 16]>) -> Self {
        let header_size = if uuid.is_some() { 24 } else { 8 };
        BoxHeader {
            typ,
            uuid,
            size: header_size,
            header_size,
            start: 0,
            wide: false,
            to_eof: false,
        }
    }

    pub fn key(&self) -> BoxKey {
        match self.uuid {
            Some(u) => BoxKey::Uuid(u),
            None => BoxKey::FourCC(self.typ),
        }
    }

    pub fn content_size(&self) -> u64 {
        self.size - self.header_size
    }

    /// Header width implied by the current `wide`/`uuid` state.
    pub fn encoded_header_size(&self) -> u64 {
        8 + if self.wide { 8 } else { 0 } + if self.uuid.is_some() { 16 } else { 0 }
    }
}

/// Interpreted payload of a concrete box kind.
///
/// This is the entire interface the core needs from a payload: externally
/// supplied kinds (metadata catalogs, DRM headers, and the like) plug in
/// through it without core changes. `content_size` must predict exactly what
/// `write_payload` emits.
pub trait BoxFields: fmt::Debug + Send + Sync {
    fn kind_code(&self) -> FourCC;
    fn content_size(&self) -> u64;
    fn write_payload(&self, out: &mut dyn Write) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
}

/// Payload state of a node. A leaf starts `Raw` and transitions to `Parsed`
/// at most once, on first semantic access; the transition is a pure
/// interpretation of the raw bytes.
pub enum Payload {
    /// Content bytes untouched since parse.
    Raw(Vec<u8>),
    /// Interpreted fields plus any trailing bytes kept verbatim.
    Parsed {
        fields: Box<dyn BoxFields>,
        dead: Vec<u8>,
    },
    /// Ordered children of a container box. `prelude` holds the version/flags
    /// (and for sample descriptions the entry-count word) preceding the first
    /// child, kept verbatim. `dead` holds any remainder after the declared
    /// children that was too small to be a box.
    Children {
        prelude: Vec<u8>,
        children: Vec<BoxNode>,
        dead: Vec<u8>,
    },
    /// Raw media-data region; bytes stay in the backing store.
    Media(MediaRegion),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw(b) => write!(f, "Raw({} bytes)", b.len()),
            Payload::Parsed { fields, dead } => {
                write!(f, "Parsed({:?}, {} dead bytes)", fields, dead.len())
            }
            Payload::Children { children, .. } => write!(f, "Children({})", children.len()),
            Payload::Media(r) => write!(f, "Media({} bytes @ {})", r.len, r.start),
        }
    }
}

#[derive(Debug)]
pub struct BoxNode {
    pub header: BoxHeader,
    /// Type context of the enclosing box, captured at parse time. Ownership
    /// is strictly downward; this is only used for registry lookups and
    /// display, never for lifetime.
    pub parent_type: Option<BoxKey>,
    pub payload: Payload,
}

impl BoxNode {
    pub fn children(&self) -> Option<&[BoxNode]> {
        match &self.payload {
            Payload::Children { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<BoxNode>> {
        match &mut self.payload {
            Payload::Children { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn find_child(&self, typ: FourCC) -> Option<&BoxNode> {
        self.children()?.iter().find(|c| c.header.typ == typ)
    }

    pub fn find_child_mut(&mut self, typ: FourCC) -> Option<&mut BoxNode> {
        self.children_mut()?
            .iter_mut()
            .find(|c| c.header.typ == typ)
    }

    /// Descend a dotted path of four-character codes, e.g. `"mdia.minf.stbl"`.
    pub fn find_path(&self, path: &str) -> Option<&BoxNode> {
        let mut node = self;
        for part in path.split('.') {
            let typ = FourCC::from_str(part)?;
            node = node.find_child(typ)?;
        }
        Some(node)
    }

    /// Transition raw content to interpreted fields via the registry; a no-op
    /// for anything already interpreted, containers, and media regions.
    /// Bytes past what the interpreter consumes are kept as dead bytes. On
    /// failure the raw bytes stay in place, so the box still round-trips.
    pub fn interpret(&mut self, registry: &Registry) -> Result<()> {
        if !matches!(self.payload, Payload::Raw(_)) {
            return Ok(());
        }
        let Payload::Raw(bytes) = std::mem::replace(&mut self.payload, Payload::Raw(Vec::new()))
        else {
            unreachable!();
        };
        match registry.interpret_payload(self.parent_type.as_ref(), &self.header, &bytes) {
            Ok((fields, dead)) => {
                self.payload = Payload::Parsed { fields, dead };
                Ok(())
            }
            Err(e) => {
                self.payload = Payload::Raw(bytes);
                Err(e)
            }
        }
    }

    /// Interpreted fields downcast to a concrete kind, interpreting lazily on
    /// first access. Returns `None` when the resolved kind is not `T`.
    pub fn fields<T: BoxFields + 'static>(&mut self, registry: &Registry) -> Result<Option<&T>> {
        self.interpret(registry)?;
        match &self.payload {
            Payload::Parsed { fields, .. } => Ok(fields.as_any().downcast_ref::<T>()),
            _ => Ok(None),
        }
    }

    /// Current content length in bytes (prelude and dead bytes included).
    pub fn content_len(&self) -> u64 {
        match &self.payload {
            Payload::Raw(b) => b.len() as u64,
            Payload::Parsed { fields, dead } => fields.content_size() + dead.len() as u64,
            Payload::Children {
                prelude,
                children,
                dead,
            } => {
                prelude.len() as u64
                    + children.iter().map(|c| c.header.size).sum::<u64>()
                    + dead.len() as u64
            }
            Payload::Media(r) => r.len,
        }
    }

    /// Recompute `header.size` bottom-up after mutation. An unmodified parse
    /// keeps its recorded header form; the 64-bit form is forced when the
    /// total no longer fits 32 bits.
    pub fn update_size(&mut self) {
        if let Payload::Children { children, .. } = &mut self.payload {
            for c in children.iter_mut() {
                c.update_size();
            }
        }
        let content = self.content_len();
        let narrow_total = 8 + content + if self.header.uuid.is_some() { 16 } else { 0 };
        if !self.header.wide && narrow_total > u32::MAX as u64 {
            self.header.wide = true;
        }
        self.header.header_size = self.header.encoded_header_size();
        self.header.size = self.header.header_size + content;
    }
}

/// Descend a dotted path starting from a top-level box list.
pub fn find_path<'a>(boxes: &'a [BoxNode], path: &str) -> Option<&'a BoxNode> {
    let (first, rest) = match path.split_once('.') {
        Some((f, r)) => (f, Some(r)),
        None => (path, None),
    };
    let typ = FourCC::from_str(first)?;
    let node = boxes.iter().find(|b| b.header.typ == typ)?;
    match rest {
        Some(r) => node.find_path(r),
        None => Some(node),
    }
}
