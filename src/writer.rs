//! Write path: the mirror image of parsing. An unmodified box re-emits its
//! recorded header form and original content bytes; interpreted boxes
//! re-serialize their fields followed by any dead bytes kept from parse.

use crate::boxes::{BoxHeader, BoxNode, Payload};
use crate::error::Result;
use crate::mdat::Backing;
use std::io::Write;

/// Encode a header in its recorded form: 0 for size-to-end boxes, the 64-bit
/// extension when `wide`, and the 16-byte extended type for uuid boxes.
pub fn encode_header(h: &BoxHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(h.header_size as usize);
    let size32: u32 = if h.to_eof {
        0
    } else if h.wide {
        1
    } else {
        h.size as u32
    };
    out.extend_from_slice(&size32.to_be_bytes());
    out.extend_from_slice(&h.typ.0);
    if h.wide {
        out.extend_from_slice(&h.size.to_be_bytes());
    }
    if let Some(u) = h.uuid {
        out.extend_from_slice(&u);
    }
    out
}

/// Serialize one node: header, then content by payload state. Media regions
/// stream from the backing store in window-sized chunks.
pub fn write_node<W: Write>(node: &BoxNode, backing: &Backing, out: &mut W) -> Result<()> {
    debug_assert_eq!(
        node.header.size,
        node.header.header_size + node.content_len(),
        "declared size out of step with content for {}",
        node.header.typ
    );

    out.write_all(&encode_header(&node.header))?;
    match &node.payload {
        Payload::Raw(bytes) => out.write_all(bytes)?,
        Payload::Parsed { fields, dead } => {
            fields.write_payload(out)?;
            out.write_all(dead)?;
        }
        Payload::Children {
            prelude,
            children,
            dead,
        } => {
            out.write_all(prelude)?;
            for child in children {
                write_node(child, backing, out)?;
            }
            out.write_all(dead)?;
        }
        Payload::Media(region) => {
            const CHUNK: u64 = 10 * 1024 * 1024;
            let mut off = region.start;
            let end = region.end();
            while off < end {
                let len = CHUNK.min(end - off);
                let bytes = backing.fetch_region(region, off, len)?;
                out.write_all(&bytes)?;
                off += len;
            }
        }
    }
    Ok(())
}

/// Serialize a top-level box sequence in order.
pub fn write_tree<W: Write>(boxes: &[BoxNode], backing: &Backing, out: &mut W) -> Result<()> {
    for node in boxes {
        write_node(node, backing, out)?;
    }
    Ok(())
}
