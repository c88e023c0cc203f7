//! Read path: the box header/size state machine and recursive descent over
//! containers. Containers are parsed eagerly into children; leaves keep their
//! raw content for lazy interpretation; media-data boxes are recorded as
//! windows into the source (or buffered when the source cannot seek).

use crate::boxes::{BoxHeader, BoxKey, BoxNode, FourCC, Payload};
use crate::error::{Error, Result};
use crate::mdat::MediaRegion;
use crate::registry::{NodeClass, Registry};
use crate::source::ByteSource;
use crate::writer::encode_header;
use std::sync::Arc;
use tracing::warn;

/// In-memory source over a container's content, positioned in absolute file
/// coordinates so nested boxes record real offsets.
struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> SliceSource<'a> {
    fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }
}

impl ByteSource for SliceSource<'_> {
    fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    fn len(&self) -> Option<u64> {
        Some(self.base + self.data.len() as u64)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        if self.pos + buf.len() > self.data.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "slice exhausted",
            ));
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> std::io::Result<()> {
        if self.pos as u64 + n > self.data.len() as u64 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "skip past slice end",
            ));
        }
        self.pos += n as usize;
        Ok(())
    }
}

fn eof_at<S: ByteSource>(src: &S, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::UnexpectedEof {
            offset: src.position(),
        }
    } else {
        Error::Io(e)
    }
}

/// Read one box header, or `None` on a clean end of source (exactly zero
/// bytes available). A partial header is `UnexpectedEof`; a declared size in
/// 2..8 (or a 64-bit size smaller than its own header) is `ImplausibleSize`.
pub fn read_box_header<S: ByteSource>(src: &mut S) -> Result<Option<BoxHeader>> {
    let start = src.position();

    let mut first = [0u8; 8];
    let mut got = 0;
    while got < 8 {
        let n = src.read_some(&mut first[got..])?;
        if n == 0 {
            if got == 0 {
                return Ok(None);
            }
            return Err(Error::UnexpectedEof {
                offset: start + got as u64,
            });
        }
        got += n;
    }

    let size32 = u32::from_be_bytes(first[0..4].try_into().unwrap());
    let typ = FourCC([first[4], first[5], first[6], first[7]]);

    let mut wide = false;
    let mut to_eof = false;
    let mut size = size32 as u64;
    if size32 == 1 {
        wide = true;
        let mut b = [0u8; 8];
        src.read_exact(&mut b).map_err(|e| eof_at(src, e))?;
        size = u64::from_be_bytes(b);
    } else if size32 == 0 {
        to_eof = true;
        match src.remaining() {
            Some(rem) => size = 8 + rem,
            None => return Err(Error::UnseekableSource { offset: start }),
        }
    }

    let mut uuid = None;
    if typ.0 == *b"uuid" {
        let mut u = [0u8; 16];
        src.read_exact(&mut u).map_err(|e| eof_at(src, e))?;
        uuid = Some(u);
    }

    let header_size = 8 + if wide { 8 } else { 0 } + if uuid.is_some() { 16 } else { 0 };
    if size < header_size {
        return Err(Error::ImplausibleSize {
            offset: start,
            size,
        });
    }

    Ok(Some(BoxHeader {
        typ,
        uuid,
        size,
        header_size,
        start,
        wide,
        to_eof,
    }))
}

/// Parse every top-level box until the source is cleanly exhausted.
///
/// `window_media` selects how media-data payloads are handled: recorded as
/// byte windows into the source (seekable backings) or buffered in memory.
/// The only fatal outcomes are a partial header mid-stream and an I/O
/// failure; an implausible declared size stops the walk gracefully.
pub fn parse_top<S: ByteSource>(
    src: &mut S,
    registry: &Registry,
    window_media: bool,
) -> Result<Vec<BoxNode>> {
    let mut boxes = Vec::new();
    loop {
        let header = match read_box_header(src) {
            Ok(Some(h)) => h,
            Ok(None) => break,
            Err(Error::ImplausibleSize { offset, size }) => {
                warn!(offset, size, "implausible box size at top level, stopping");
                break;
            }
            Err(e) => return Err(e),
        };
        boxes.push(parse_content(src, header, None, registry, window_media)?);
    }
    Ok(boxes)
}

/// Parse one box's content according to its registry-resolved class. The
/// header has already been consumed.
fn parse_content<S: ByteSource>(
    src: &mut S,
    header: BoxHeader,
    parent: Option<BoxKey>,
    registry: &Registry,
    window_media: bool,
) -> Result<BoxNode> {
    let entry = registry.resolve(parent.as_ref(), &header.key());
    let content_size = header.content_size();

    let payload = match entry.class {
        NodeClass::Container { prelude } => {
            if content_size < prelude as u64 {
                // Too short for its own class; keep it verbatim.
                warn!(
                    typ = %header.typ,
                    offset = header.start,
                    "container content shorter than its fixed prelude, keeping raw"
                );
                Payload::Raw(read_vec(src, content_size)?)
            } else {
                let prelude_bytes = read_vec(src, prelude as u64)?;
                let body = read_vec(src, content_size - prelude as u64)?;
                let base = header.start + header.header_size + prelude as u64;
                let (children, dead) =
                    parse_container_content(&body, base, header.key(), registry, window_media)?;
                Payload::Children {
                    prelude: prelude_bytes,
                    children,
                    dead,
                }
            }
        }
        NodeClass::Leaf => Payload::Raw(read_vec(src, content_size)?),
        NodeClass::Media => {
            let start = header.start + header.header_size;
            if let Some(rem) = src.remaining() {
                if rem < content_size {
                    return Err(Error::UnexpectedEof {
                        offset: src.position() + rem,
                    });
                }
            }
            let data = if window_media {
                src.skip(content_size).map_err(|e| eof_at(src, e))?;
                None
            } else {
                Some(Arc::from(read_vec(src, content_size)?.into_boxed_slice()))
            };
            Payload::Media(MediaRegion {
                start,
                len: content_size,
                header_start: header.start,
                header_bytes: encode_header(&header),
                data,
            })
        }
    };

    Ok(BoxNode {
        header,
        parent_type: parent,
        payload,
    })
}

/// Walk a container's content buffer child by child. A remainder smaller
/// than one header, an implausible child size, or a child overrunning the
/// container end all leave the rest as verbatim dead bytes with a warning;
/// none of them fail the parse.
fn parse_container_content(
    body: &[u8],
    base: u64,
    parent: BoxKey,
    registry: &Registry,
    window_media: bool,
) -> Result<(Vec<BoxNode>, Vec<u8>)> {
    let mut src = SliceSource::new(body, base);
    let mut children = Vec::new();
    let end = base + body.len() as u64;

    loop {
        let local = (src.position() - base) as usize;
        let rem = body.len() - local;
        if rem == 0 {
            break;
        }
        if rem < 8 {
            warn!(
                parent = ?parent,
                offset = src.position(),
                bytes = rem,
                "container remainder too small for a box header, kept as dead bytes"
            );
            return Ok((children, body[local..].to_vec()));
        }

        let header = match read_box_header(&mut src) {
            Ok(Some(h)) => h,
            Ok(None) => break,
            Err(Error::ImplausibleSize { offset, size }) => {
                warn!(
                    parent = ?parent,
                    offset,
                    size,
                    "implausible child size, remainder kept as dead bytes"
                );
                return Ok((children, body[local..].to_vec()));
            }
            Err(e) => return Err(e),
        };

        if header.start + header.size > end {
            warn!(
                parent = ?parent,
                typ = %header.typ,
                offset = header.start,
                "child overruns container end, remainder kept as dead bytes"
            );
            return Ok((children, body[local..].to_vec()));
        }

        children.push(parse_content(
            &mut src,
            header,
            Some(parent),
            registry,
            window_media,
        )?);
    }

    Ok((children, Vec::new()))
}

fn read_vec<S: ByteSource>(src: &mut S, n: u64) -> Result<Vec<u8>> {
    let mut v = vec![0u8; n as usize];
    src.read_exact(&mut v).map_err(|e| eof_at(src, e))?;
    Ok(v)
}
