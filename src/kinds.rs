//! Built-in concrete box kinds: the movie/track headers and the sample-table
//! and fragment tables the resolver walks, plus the AVC configuration record
//! and the generic raw kind everything unresolved falls back to.
//!
//! Every kind parses its payload from content bytes, predicts its encoded
//! size, and writes itself back; trailing bytes it does not understand are
//! returned to the caller as dead bytes and re-emitted verbatim.

use crate::boxes::{BoxFields, FourCC};
use crate::codec;
use crate::error::{Error, Result};
use crate::registry::KindContext;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::any::Any;
use std::io::{Cursor, Read, Write};

type Interpreted = (Box<dyn BoxFields>, Vec<u8>);

fn need(ctx: &KindContext, content: &[u8], n: u64) -> Result<()> {
    if (content.len() as u64) < n {
        return Err(Error::TruncatedPayload {
            typ: ctx.typ,
            need: n,
            have: content.len() as u64,
        });
    }
    Ok(())
}

fn split_dead(content: &[u8], consumed: u64) -> Vec<u8> {
    content[consumed as usize..].to_vec()
}

fn read_full_header(cur: &mut Cursor<&[u8]>) -> Result<(u8, u32)> {
    let version = cur.read_u8()?;
    let flags = cur.read_u24::<BigEndian>()?;
    Ok((version, flags))
}

fn write_full_header(w: &mut dyn Write, version: u8, flags: u32) -> Result<()> {
    w.write_u8(version)?;
    w.write_u24::<BigEndian>(flags)?;
    Ok(())
}

// ---------- generic raw kind ----------

/// Verbatim payload for unresolved or deliberately uninterpreted kinds.
#[derive(Debug, Serialize)]
pub struct RawFields {
    pub typ: FourCC,
    pub uuid: Option<[u8; 16]>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl BoxFields for RawFields {
    fn kind_code(&self) -> FourCC {
        self.typ
    }
    fn content_size(&self) -> u64 {
        self.bytes.len() as u64
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(&self.bytes)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_raw(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    Ok((
        Box::new(RawFields {
            typ: ctx.typ,
            uuid: ctx.uuid,
            bytes: content.to_vec(),
        }),
        Vec::new(),
    ))
}

// ---------- ftyp / styp ----------

#[derive(Debug, Serialize)]
pub struct Ftyp {
    pub typ: FourCC,
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl BoxFields for Ftyp {
    fn kind_code(&self) -> FourCC {
        self.typ
    }
    fn content_size(&self) -> u64 {
        8 + self.compatible_brands.len() as u64 * 4
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(&self.major_brand.0)?;
        out.write_u32::<BigEndian>(self.minor_version)?;
        for brand in &self.compatible_brands {
            out.write_all(&brand.0)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_ftyp(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut major = [0u8; 4];
    major.copy_from_slice(&content[0..4]);
    let minor_version = u32::from_be_bytes(content[4..8].try_into().unwrap());
    let brands = content[8..]
        .chunks_exact(4)
        .map(|c| FourCC([c[0], c[1], c[2], c[3]]))
        .collect::<Vec<_>>();
    let consumed = 8 + brands.len() as u64 * 4;
    Ok((
        Box::new(Ftyp {
            typ: ctx.typ,
            major_brand: FourCC(major),
            minor_version,
            compatible_brands: brands,
        }),
        split_dead(content, consumed),
    ))
}

// ---------- mvhd ----------

#[derive(Debug, Serialize)]
pub struct Mvhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: f64,
    pub volume: f32,
    reserved: u16,
    reserved2: [u32; 2],
    pub matrix: [u32; 9],
    pre_defined: [u32; 6],
    pub next_track_id: u32,
}

impl BoxFields for Mvhd {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"mvhd")
    }
    fn content_size(&self) -> u64 {
        if self.version == 1 { 112 } else { 100 }
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        if self.version == 1 {
            out.write_u64::<BigEndian>(self.creation_time)?;
            out.write_u64::<BigEndian>(self.modification_time)?;
            out.write_u32::<BigEndian>(self.timescale)?;
            out.write_u64::<BigEndian>(self.duration)?;
        } else {
            out.write_u32::<BigEndian>(self.creation_time as u32)?;
            out.write_u32::<BigEndian>(self.modification_time as u32)?;
            out.write_u32::<BigEndian>(self.timescale)?;
            out.write_u32::<BigEndian>(self.duration as u32)?;
        }
        codec::write_fixed_16_16(out, self.rate)?;
        codec::write_fixed_8_8(out, self.volume)?;
        out.write_u16::<BigEndian>(self.reserved)?;
        for r in self.reserved2 {
            out.write_u32::<BigEndian>(r)?;
        }
        for m in self.matrix {
            out.write_u32::<BigEndian>(m)?;
        }
        for p in self.pre_defined {
            out.write_u32::<BigEndian>(p)?;
        }
        out.write_u32::<BigEndian>(self.next_track_id)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_mvhd(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 4)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    need(ctx, content, if version == 1 { 112 } else { 100 })?;

    let (creation_time, modification_time, timescale, duration) = if version == 1 {
        (
            cur.read_u64::<BigEndian>()?,
            cur.read_u64::<BigEndian>()?,
            cur.read_u32::<BigEndian>()?,
            cur.read_u64::<BigEndian>()?,
        )
    } else {
        (
            cur.read_u32::<BigEndian>()? as u64,
            cur.read_u32::<BigEndian>()? as u64,
            cur.read_u32::<BigEndian>()?,
            cur.read_u32::<BigEndian>()? as u64,
        )
    };
    let rate = codec::read_fixed_16_16(&mut cur)?;
    let volume = codec::read_fixed_8_8(&mut cur)?;
    let reserved = cur.read_u16::<BigEndian>()?;
    let mut reserved2 = [0u32; 2];
    for r in &mut reserved2 {
        *r = cur.read_u32::<BigEndian>()?;
    }
    let mut matrix = [0u32; 9];
    for m in &mut matrix {
        *m = cur.read_u32::<BigEndian>()?;
    }
    let mut pre_defined = [0u32; 6];
    for p in &mut pre_defined {
        *p = cur.read_u32::<BigEndian>()?;
    }
    let next_track_id = cur.read_u32::<BigEndian>()?;

    let consumed = cur.position();
    Ok((
        Box::new(Mvhd {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            reserved,
            reserved2,
            matrix,
            pre_defined,
            next_track_id,
        }),
        split_dead(content, consumed),
    ))
}

// ---------- tkhd ----------

#[derive(Debug, Serialize)]
pub struct Tkhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    reserved: u32,
    pub duration: u64,
    reserved2: [u32; 2],
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: f32,
    reserved3: u16,
    pub matrix: [u32; 9],
    pub width: f64,
    pub height: f64,
}

impl BoxFields for Tkhd {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"tkhd")
    }
    fn content_size(&self) -> u64 {
        if self.version == 1 { 96 } else { 84 }
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        if self.version == 1 {
            out.write_u64::<BigEndian>(self.creation_time)?;
            out.write_u64::<BigEndian>(self.modification_time)?;
            out.write_u32::<BigEndian>(self.track_id)?;
            out.write_u32::<BigEndian>(self.reserved)?;
            out.write_u64::<BigEndian>(self.duration)?;
        } else {
            out.write_u32::<BigEndian>(self.creation_time as u32)?;
            out.write_u32::<BigEndian>(self.modification_time as u32)?;
            out.write_u32::<BigEndian>(self.track_id)?;
            out.write_u32::<BigEndian>(self.reserved)?;
            out.write_u32::<BigEndian>(self.duration as u32)?;
        }
        for r in self.reserved2 {
            out.write_u32::<BigEndian>(r)?;
        }
        out.write_i16::<BigEndian>(self.layer)?;
        out.write_i16::<BigEndian>(self.alternate_group)?;
        codec::write_fixed_8_8(out, self.volume)?;
        out.write_u16::<BigEndian>(self.reserved3)?;
        for m in self.matrix {
            out.write_u32::<BigEndian>(m)?;
        }
        codec::write_fixed_16_16(out, self.width)?;
        codec::write_fixed_16_16(out, self.height)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_tkhd(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 4)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    need(ctx, content, if version == 1 { 96 } else { 84 })?;

    let (creation_time, modification_time, track_id, reserved, duration) = if version == 1 {
        (
            cur.read_u64::<BigEndian>()?,
            cur.read_u64::<BigEndian>()?,
            cur.read_u32::<BigEndian>()?,
            cur.read_u32::<BigEndian>()?,
            cur.read_u64::<BigEndian>()?,
        )
    } else {
        (
            cur.read_u32::<BigEndian>()? as u64,
            cur.read_u32::<BigEndian>()? as u64,
            cur.read_u32::<BigEndian>()?,
            cur.read_u32::<BigEndian>()?,
            cur.read_u32::<BigEndian>()? as u64,
        )
    };
    let mut reserved2 = [0u32; 2];
    for r in &mut reserved2 {
        *r = cur.read_u32::<BigEndian>()?;
    }
    let layer = cur.read_i16::<BigEndian>()?;
    let alternate_group = cur.read_i16::<BigEndian>()?;
    let volume = codec::read_fixed_8_8(&mut cur)?;
    let reserved3 = cur.read_u16::<BigEndian>()?;
    let mut matrix = [0u32; 9];
    for m in &mut matrix {
        *m = cur.read_u32::<BigEndian>()?;
    }
    let width = codec::read_fixed_16_16(&mut cur)?;
    let height = codec::read_fixed_16_16(&mut cur)?;

    let consumed = cur.position();
    Ok((
        Box::new(Tkhd {
            version,
            flags,
            creation_time,
            modification_time,
            track_id,
            reserved,
            duration,
            reserved2,
            layer,
            alternate_group,
            volume,
            reserved3,
            matrix,
            width,
            height,
        }),
        split_dead(content, consumed),
    ))
}

// ---------- mdhd ----------

#[derive(Debug, Serialize)]
pub struct Mdhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub language: String,
    language_raw: u16,
    pre_defined: u16,
}

impl BoxFields for Mdhd {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"mdhd")
    }
    fn content_size(&self) -> u64 {
        if self.version == 1 { 36 } else { 24 }
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        if self.version == 1 {
            out.write_u64::<BigEndian>(self.creation_time)?;
            out.write_u64::<BigEndian>(self.modification_time)?;
            out.write_u32::<BigEndian>(self.timescale)?;
            out.write_u64::<BigEndian>(self.duration)?;
        } else {
            out.write_u32::<BigEndian>(self.creation_time as u32)?;
            out.write_u32::<BigEndian>(self.modification_time as u32)?;
            out.write_u32::<BigEndian>(self.timescale)?;
            out.write_u32::<BigEndian>(self.duration as u32)?;
        }
        out.write_u16::<BigEndian>(self.language_raw)?;
        out.write_u16::<BigEndian>(self.pre_defined)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_mdhd(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 4)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    need(ctx, content, if version == 1 { 36 } else { 24 })?;

    let (creation_time, modification_time, timescale, duration) = if version == 1 {
        (
            cur.read_u64::<BigEndian>()?,
            cur.read_u64::<BigEndian>()?,
            cur.read_u32::<BigEndian>()?,
            cur.read_u64::<BigEndian>()?,
        )
    } else {
        (
            cur.read_u32::<BigEndian>()? as u64,
            cur.read_u32::<BigEndian>()? as u64,
            cur.read_u32::<BigEndian>()?,
            cur.read_u32::<BigEndian>()? as u64,
        )
    };
    let language_raw = cur.read_u16::<BigEndian>()?;
    let language = codec::unpack_language(language_raw);
    let pre_defined = cur.read_u16::<BigEndian>()?;

    let consumed = cur.position();
    Ok((
        Box::new(Mdhd {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
            language_raw,
            pre_defined,
        }),
        split_dead(content, consumed),
    ))
}

// ---------- hdlr ----------

#[derive(Debug, Serialize)]
pub struct Hdlr {
    pub version: u8,
    pub flags: u32,
    pre_defined: u32,
    pub handler_type: FourCC,
    reserved: [u32; 3],
    /// Name bytes exactly as encoded (padding and terminator included).
    #[serde(skip)]
    name_raw: Vec<u8>,
}

impl Hdlr {
    pub fn name(&self) -> String {
        let trimmed: &[u8] = match self.name_raw.split_last() {
            Some((0, rest)) => rest,
            _ => &self.name_raw,
        };
        String::from_utf8_lossy(trimmed).into_owned()
    }
}

impl BoxFields for Hdlr {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"hdlr")
    }
    fn content_size(&self) -> u64 {
        24 + self.name_raw.len() as u64
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.pre_defined)?;
        out.write_all(&self.handler_type.0)?;
        for r in self.reserved {
            out.write_u32::<BigEndian>(r)?;
        }
        out.write_all(&self.name_raw)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_hdlr(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 24)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let pre_defined = cur.read_u32::<BigEndian>()?;
    let mut handler = [0u8; 4];
    cur.read_exact(&mut handler)
        .map_err(Error::from)?;
    let mut reserved = [0u32; 3];
    for r in &mut reserved {
        *r = cur.read_u32::<BigEndian>()?;
    }
    let name_raw = content[cur.position() as usize..].to_vec();
    Ok((
        Box::new(Hdlr {
            version,
            flags,
            pre_defined,
            handler_type: FourCC(handler),
            reserved,
            name_raw,
        }),
        Vec::new(),
    ))
}

// ---------- stts / ctts ----------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

#[derive(Debug, Serialize)]
pub struct Stts {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<SttsEntry>,
}

impl BoxFields for Stts {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"stts")
    }
    fn content_size(&self) -> u64 {
        8 + self.entries.len() as u64 * 8
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.entries.len() as u32)?;
        for e in &self.entries {
            out.write_u32::<BigEndian>(e.sample_count)?;
            out.write_u32::<BigEndian>(e.sample_delta)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_stts(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()? as u64;
    need(ctx, content, 8 + entry_count * 8)?;
    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        entries.push(SttsEntry {
            sample_count: cur.read_u32::<BigEndian>()?,
            sample_delta: cur.read_u32::<BigEndian>()?,
        });
    }
    let consumed = cur.position();
    Ok((
        Box::new(Stts { version, flags, entries }),
        split_dead(content, consumed),
    ))
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CttsEntry {
    pub sample_count: u32,
    /// Negative only in version 1.
    pub sample_offset: i32,
}

#[derive(Debug, Serialize)]
pub struct Ctts {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<CttsEntry>,
}

impl BoxFields for Ctts {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"ctts")
    }
    fn content_size(&self) -> u64 {
        8 + self.entries.len() as u64 * 8
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.entries.len() as u32)?;
        for e in &self.entries {
            out.write_u32::<BigEndian>(e.sample_count)?;
            out.write_u32::<BigEndian>(e.sample_offset as u32)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_ctts(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()? as u64;
    need(ctx, content, 8 + entry_count * 8)?;
    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        entries.push(CttsEntry {
            sample_count: cur.read_u32::<BigEndian>()?,
            sample_offset: cur.read_u32::<BigEndian>()? as i32,
        });
    }
    let consumed = cur.position();
    Ok((
        Box::new(Ctts { version, flags, entries }),
        split_dead(content, consumed),
    ))
}

// ---------- stsc ----------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

#[derive(Debug, Serialize)]
pub struct Stsc {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<StscEntry>,
}

impl BoxFields for Stsc {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"stsc")
    }
    fn content_size(&self) -> u64 {
        8 + self.entries.len() as u64 * 12
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.entries.len() as u32)?;
        for e in &self.entries {
            out.write_u32::<BigEndian>(e.first_chunk)?;
            out.write_u32::<BigEndian>(e.samples_per_chunk)?;
            out.write_u32::<BigEndian>(e.sample_description_index)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_stsc(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()? as u64;
    need(ctx, content, 8 + entry_count * 12)?;
    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        entries.push(StscEntry {
            first_chunk: cur.read_u32::<BigEndian>()?,
            samples_per_chunk: cur.read_u32::<BigEndian>()?,
            sample_description_index: cur.read_u32::<BigEndian>()?,
        });
    }
    let consumed = cur.position();
    Ok((
        Box::new(Stsc { version, flags, entries }),
        split_dead(content, consumed),
    ))
}

// ---------- stsz ----------

#[derive(Debug, Serialize)]
pub struct Stsz {
    pub version: u8,
    pub flags: u32,
    /// Non-zero means every sample has this size and the list is empty.
    pub sample_size: u32,
    pub sample_count: u32,
    pub sample_sizes: Vec<u32>,
}

impl Stsz {
    pub fn size_of(&self, index: u32) -> Option<u32> {
        if self.sample_size != 0 {
            (index < self.sample_count).then_some(self.sample_size)
        } else {
            self.sample_sizes.get(index as usize).copied()
        }
    }
}

impl BoxFields for Stsz {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"stsz")
    }
    fn content_size(&self) -> u64 {
        12 + self.sample_sizes.len() as u64 * 4
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.sample_size)?;
        out.write_u32::<BigEndian>(self.sample_count)?;
        for s in &self.sample_sizes {
            out.write_u32::<BigEndian>(*s)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_stsz(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 12)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let sample_size = cur.read_u32::<BigEndian>()?;
    let sample_count = cur.read_u32::<BigEndian>()?;
    let mut sample_sizes = Vec::new();
    if sample_size == 0 {
        need(ctx, content, 12 + sample_count as u64 * 4)?;
        sample_sizes.reserve(sample_count as usize);
        for _ in 0..sample_count {
            sample_sizes.push(cur.read_u32::<BigEndian>()?);
        }
    }
    let consumed = cur.position();
    Ok((
        Box::new(Stsz {
            version,
            flags,
            sample_size,
            sample_count,
            sample_sizes,
        }),
        split_dead(content, consumed),
    ))
}

// ---------- stco / co64 ----------

#[derive(Debug, Serialize)]
pub struct Stco {
    pub version: u8,
    pub flags: u32,
    pub chunk_offsets: Vec<u32>,
}

impl BoxFields for Stco {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"stco")
    }
    fn content_size(&self) -> u64 {
        8 + self.chunk_offsets.len() as u64 * 4
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.chunk_offsets.len() as u32)?;
        for o in &self.chunk_offsets {
            out.write_u32::<BigEndian>(*o)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_stco(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()? as u64;
    need(ctx, content, 8 + entry_count * 4)?;
    let mut chunk_offsets = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        chunk_offsets.push(cur.read_u32::<BigEndian>()?);
    }
    let consumed = cur.position();
    Ok((
        Box::new(Stco { version, flags, chunk_offsets }),
        split_dead(content, consumed),
    ))
}

#[derive(Debug, Serialize)]
pub struct Co64 {
    pub version: u8,
    pub flags: u32,
    pub chunk_offsets: Vec<u64>,
}

impl BoxFields for Co64 {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"co64")
    }
    fn content_size(&self) -> u64 {
        8 + self.chunk_offsets.len() as u64 * 8
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.chunk_offsets.len() as u32)?;
        for o in &self.chunk_offsets {
            out.write_u64::<BigEndian>(*o)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_co64(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()? as u64;
    need(ctx, content, 8 + entry_count * 8)?;
    let mut chunk_offsets = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        chunk_offsets.push(cur.read_u64::<BigEndian>()?);
    }
    let consumed = cur.position();
    Ok((
        Box::new(Co64 { version, flags, chunk_offsets }),
        split_dead(content, consumed),
    ))
}

// ---------- stss ----------

#[derive(Debug, Serialize)]
pub struct Stss {
    pub version: u8,
    pub flags: u32,
    /// 1-based sample numbers of sync samples.
    pub sample_numbers: Vec<u32>,
}

impl BoxFields for Stss {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"stss")
    }
    fn content_size(&self) -> u64 {
        8 + self.sample_numbers.len() as u64 * 4
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.sample_numbers.len() as u32)?;
        for n in &self.sample_numbers {
            out.write_u32::<BigEndian>(*n)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_stss(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()? as u64;
    need(ctx, content, 8 + entry_count * 4)?;
    let mut sample_numbers = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        sample_numbers.push(cur.read_u32::<BigEndian>()?);
    }
    let consumed = cur.position();
    Ok((
        Box::new(Stss { version, flags, sample_numbers }),
        split_dead(content, consumed),
    ))
}

// ---------- mvex: mehd / trex ----------

#[derive(Debug, Serialize)]
pub struct Mehd {
    pub version: u8,
    pub flags: u32,
    pub fragment_duration: u64,
}

impl BoxFields for Mehd {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"mehd")
    }
    fn content_size(&self) -> u64 {
        if self.version == 1 { 12 } else { 8 }
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        if self.version == 1 {
            out.write_u64::<BigEndian>(self.fragment_duration)?;
        } else {
            out.write_u32::<BigEndian>(self.fragment_duration as u32)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_mehd(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    need(ctx, content, if version == 1 { 12 } else { 8 })?;
    let fragment_duration = if version == 1 {
        cur.read_u64::<BigEndian>()?
    } else {
        cur.read_u32::<BigEndian>()? as u64
    };
    let consumed = cur.position();
    Ok((
        Box::new(Mehd { version, flags, fragment_duration }),
        split_dead(content, consumed),
    ))
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Trex {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl BoxFields for Trex {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"trex")
    }
    fn content_size(&self) -> u64 {
        24
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.track_id)?;
        out.write_u32::<BigEndian>(self.default_sample_description_index)?;
        out.write_u32::<BigEndian>(self.default_sample_duration)?;
        out.write_u32::<BigEndian>(self.default_sample_size)?;
        out.write_u32::<BigEndian>(self.default_sample_flags)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_trex(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 24)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let trex = Trex {
        version,
        flags,
        track_id: cur.read_u32::<BigEndian>()?,
        default_sample_description_index: cur.read_u32::<BigEndian>()?,
        default_sample_duration: cur.read_u32::<BigEndian>()?,
        default_sample_size: cur.read_u32::<BigEndian>()?,
        default_sample_flags: cur.read_u32::<BigEndian>()?,
    };
    let consumed = cur.position();
    Ok((Box::new(trex), split_dead(content, consumed)))
}

// ---------- moof: mfhd / tfhd / tfdt / trun ----------

#[derive(Debug, Serialize)]
pub struct Mfhd {
    pub version: u8,
    pub flags: u32,
    pub sequence_number: u32,
}

impl BoxFields for Mfhd {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"mfhd")
    }
    fn content_size(&self) -> u64 {
        8
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.sequence_number)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_mfhd(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let sequence_number = cur.read_u32::<BigEndian>()?;
    let consumed = cur.position();
    Ok((
        Box::new(Mfhd { version, flags, sequence_number }),
        split_dead(content, consumed),
    ))
}

pub const TFHD_BASE_DATA_OFFSET: u32 = 0x0000_0001;
pub const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x0000_0002;
pub const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x0000_0008;
pub const TFHD_DEFAULT_SAMPLE_SIZE: u32 = 0x0000_0010;
pub const TFHD_DEFAULT_SAMPLE_FLAGS: u32 = 0x0000_0020;
pub const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x0002_0000;

#[derive(Debug, Serialize)]
pub struct Tfhd {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl BoxFields for Tfhd {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"tfhd")
    }
    fn content_size(&self) -> u64 {
        let mut total = 8;
        if self.flags & TFHD_BASE_DATA_OFFSET != 0 {
            total += 8;
        }
        if self.flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            total += 4;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
            total += 4;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
            total += 4;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0 {
            total += 4;
        }
        total
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.track_id)?;
        if self.flags & TFHD_BASE_DATA_OFFSET != 0 {
            out.write_u64::<BigEndian>(self.base_data_offset.unwrap_or(0))?;
        }
        if self.flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            out.write_u32::<BigEndian>(self.sample_description_index.unwrap_or(0))?;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
            out.write_u32::<BigEndian>(self.default_sample_duration.unwrap_or(0))?;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
            out.write_u32::<BigEndian>(self.default_sample_size.unwrap_or(0))?;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0 {
            out.write_u32::<BigEndian>(self.default_sample_flags.unwrap_or(0))?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_tfhd(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let track_id = cur.read_u32::<BigEndian>()?;

    let mut needed = 8u64;
    for (bit, width) in [
        (TFHD_BASE_DATA_OFFSET, 8u64),
        (TFHD_SAMPLE_DESCRIPTION_INDEX, 4),
        (TFHD_DEFAULT_SAMPLE_DURATION, 4),
        (TFHD_DEFAULT_SAMPLE_SIZE, 4),
        (TFHD_DEFAULT_SAMPLE_FLAGS, 4),
    ] {
        if flags & bit != 0 {
            needed += width;
        }
    }
    need(ctx, content, needed)?;

    let base_data_offset = (flags & TFHD_BASE_DATA_OFFSET != 0)
        .then(|| cur.read_u64::<BigEndian>())
        .transpose()?;
    let sample_description_index = (flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0)
        .then(|| cur.read_u32::<BigEndian>())
        .transpose()?;
    let default_sample_duration = (flags & TFHD_DEFAULT_SAMPLE_DURATION != 0)
        .then(|| cur.read_u32::<BigEndian>())
        .transpose()?;
    let default_sample_size = (flags & TFHD_DEFAULT_SAMPLE_SIZE != 0)
        .then(|| cur.read_u32::<BigEndian>())
        .transpose()?;
    let default_sample_flags = (flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0)
        .then(|| cur.read_u32::<BigEndian>())
        .transpose()?;

    let consumed = cur.position();
    Ok((
        Box::new(Tfhd {
            version,
            flags,
            track_id,
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        }),
        split_dead(content, consumed),
    ))
}

#[derive(Debug, Serialize)]
pub struct Tfdt {
    pub version: u8,
    pub flags: u32,
    pub base_media_decode_time: u64,
}

impl BoxFields for Tfdt {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"tfdt")
    }
    fn content_size(&self) -> u64 {
        if self.version == 1 { 12 } else { 8 }
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        if self.version == 1 {
            out.write_u64::<BigEndian>(self.base_media_decode_time)?;
        } else {
            out.write_u32::<BigEndian>(self.base_media_decode_time as u32)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_tfdt(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    need(ctx, content, if version == 1 { 12 } else { 8 })?;
    let base_media_decode_time = if version == 1 {
        cur.read_u64::<BigEndian>()?
    } else {
        cur.read_u32::<BigEndian>()? as u64
    };
    let consumed = cur.position();
    Ok((
        Box::new(Tfdt { version, flags, base_media_decode_time }),
        split_dead(content, consumed),
    ))
}

pub const TRUN_DATA_OFFSET: u32 = 0x0000_0001;
pub const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x0000_0004;
pub const TRUN_SAMPLE_DURATION: u32 = 0x0000_0100;
pub const TRUN_SAMPLE_SIZE: u32 = 0x0000_0200;
pub const TRUN_SAMPLE_FLAGS: u32 = 0x0000_0400;
pub const TRUN_SAMPLE_COMPOSITION_OFFSET: u32 = 0x0000_0800;

/// `sample_is_non_sync_sample` bit of a sample-flags word.
pub const SAMPLE_IS_NON_SYNC: u32 = 0x0001_0000;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrunEntry {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub composition_offset: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct Trun {
    pub version: u8,
    pub flags: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub entries: Vec<TrunEntry>,
}

impl Trun {
    fn entry_width(&self) -> u64 {
        let mut w = 0;
        if self.flags & TRUN_SAMPLE_DURATION != 0 {
            w += 4;
        }
        if self.flags & TRUN_SAMPLE_SIZE != 0 {
            w += 4;
        }
        if self.flags & TRUN_SAMPLE_FLAGS != 0 {
            w += 4;
        }
        if self.flags & TRUN_SAMPLE_COMPOSITION_OFFSET != 0 {
            w += 4;
        }
        w
    }
}

impl BoxFields for Trun {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"trun")
    }
    fn content_size(&self) -> u64 {
        let mut total = 8;
        if self.flags & TRUN_DATA_OFFSET != 0 {
            total += 4;
        }
        if self.flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            total += 4;
        }
        total + self.entries.len() as u64 * self.entry_width()
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        write_full_header(out, self.version, self.flags)?;
        out.write_u32::<BigEndian>(self.entries.len() as u32)?;
        if self.flags & TRUN_DATA_OFFSET != 0 {
            out.write_i32::<BigEndian>(self.data_offset.unwrap_or(0))?;
        }
        if self.flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            out.write_u32::<BigEndian>(self.first_sample_flags.unwrap_or(0))?;
        }
        for e in &self.entries {
            if self.flags & TRUN_SAMPLE_DURATION != 0 {
                out.write_u32::<BigEndian>(e.duration.unwrap_or(0))?;
            }
            if self.flags & TRUN_SAMPLE_SIZE != 0 {
                out.write_u32::<BigEndian>(e.size.unwrap_or(0))?;
            }
            if self.flags & TRUN_SAMPLE_FLAGS != 0 {
                out.write_u32::<BigEndian>(e.flags.unwrap_or(0))?;
            }
            if self.flags & TRUN_SAMPLE_COMPOSITION_OFFSET != 0 {
                out.write_u32::<BigEndian>(e.composition_offset.unwrap_or(0) as u32)?;
            }
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_trun(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 8)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;
    let sample_count = cur.read_u32::<BigEndian>()? as u64;

    let mut head = 8u64;
    if flags & TRUN_DATA_OFFSET != 0 {
        head += 4;
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        head += 4;
    }
    let mut entry_width = 0u64;
    for bit in [
        TRUN_SAMPLE_DURATION,
        TRUN_SAMPLE_SIZE,
        TRUN_SAMPLE_FLAGS,
        TRUN_SAMPLE_COMPOSITION_OFFSET,
    ] {
        if flags & bit != 0 {
            entry_width += 4;
        }
    }
    need(ctx, content, head + sample_count * entry_width)?;

    let data_offset = (flags & TRUN_DATA_OFFSET != 0)
        .then(|| cur.read_i32::<BigEndian>())
        .transpose()?;
    let first_sample_flags = (flags & TRUN_FIRST_SAMPLE_FLAGS != 0)
        .then(|| cur.read_u32::<BigEndian>())
        .transpose()?;

    let mut entries = Vec::with_capacity(sample_count as usize);
    for _ in 0..sample_count {
        let mut e = TrunEntry::default();
        if flags & TRUN_SAMPLE_DURATION != 0 {
            e.duration = Some(cur.read_u32::<BigEndian>()?);
        }
        if flags & TRUN_SAMPLE_SIZE != 0 {
            e.size = Some(cur.read_u32::<BigEndian>()?);
        }
        if flags & TRUN_SAMPLE_FLAGS != 0 {
            e.flags = Some(cur.read_u32::<BigEndian>()?);
        }
        if flags & TRUN_SAMPLE_COMPOSITION_OFFSET != 0 {
            e.composition_offset = Some(cur.read_u32::<BigEndian>()? as i32);
        }
        entries.push(e);
    }

    let consumed = cur.position();
    Ok((
        Box::new(Trun {
            version,
            flags,
            data_offset,
            first_sample_flags,
            entries,
        }),
        split_dead(content, consumed),
    ))
}

// ---------- esds ----------

const TAG_ES_DESCRIPTOR: u8 = 0x03;
const TAG_DECODER_CONFIG: u8 = 0x04;
const TAG_DECODER_SPECIFIC_INFO: u8 = 0x05;

/// Elementary stream descriptor. Interpretation is a read-only view over the
/// descriptor chain: the payload is kept verbatim and re-emitted as parsed,
/// since the expandable length fields admit several byte encodings.
#[derive(Debug, Serialize)]
pub struct Esds {
    pub version: u8,
    pub flags: u32,
    pub es_id: u16,
    pub object_type: Option<u8>,
    pub max_bitrate: Option<u32>,
    pub avg_bitrate: Option<u32>,
    #[serde(skip)]
    pub decoder_specific_info: Option<Vec<u8>>,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl BoxFields for Esds {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"esds")
    }
    fn content_size(&self) -> u64 {
        self.raw.len() as u64
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(&self.raw)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Expandable descriptor length: 7 bits per byte, high bit continues.
fn read_descriptor_length(cur: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut len = 0u32;
    for _ in 0..4 {
        let b = cur.read_u8()?;
        len = (len << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            return Ok(len);
        }
    }
    Ok(len)
}

pub fn interpret_esds(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 4)?;
    let mut cur = Cursor::new(content);
    let (version, flags) = read_full_header(&mut cur)?;

    let mut esds = Esds {
        version,
        flags,
        es_id: 0,
        object_type: None,
        max_bitrate: None,
        avg_bitrate: None,
        decoder_specific_info: None,
        raw: content.to_vec(),
    };

    // Walk the descriptor chain; unknown tags are skipped by their declared
    // length, which is all the traversal the core needs.
    while (cur.position() as usize) + 2 <= content.len() {
        let tag = cur.read_u8()?;
        let len = read_descriptor_length(&mut cur)?;
        let body_end = cur.position() + len as u64;
        if body_end > content.len() as u64 {
            break;
        }
        match tag {
            TAG_ES_DESCRIPTOR => {
                esds.es_id = cur.read_u16::<BigEndian>()?;
                let stream_flags = cur.read_u8()?;
                if stream_flags & 0x80 != 0 {
                    cur.set_position(cur.position() + 2); // depends-on ES id
                }
                if stream_flags & 0x40 != 0 {
                    let url_len = cur.read_u8()? as u64;
                    cur.set_position(cur.position() + url_len);
                }
                if stream_flags & 0x20 != 0 {
                    cur.set_position(cur.position() + 2); // OCR ES id
                }
                // Nested descriptors follow; keep walking inside.
            }
            TAG_DECODER_CONFIG => {
                esds.object_type = Some(cur.read_u8()?);
                let _stream_type = cur.read_u8()?;
                let _buffer_size = cur.read_u24::<BigEndian>()?;
                esds.max_bitrate = Some(cur.read_u32::<BigEndian>()?);
                esds.avg_bitrate = Some(cur.read_u32::<BigEndian>()?);
            }
            TAG_DECODER_SPECIFIC_INFO => {
                let start = cur.position() as usize;
                esds.decoder_specific_info = Some(content[start..body_end as usize].to_vec());
                cur.set_position(body_end);
            }
            _ => {
                cur.set_position(body_end);
            }
        }
    }

    Ok((Box::new(esds), Vec::new()))
}

// ---------- avcC ----------

/// AVC decoder configuration record. The reserved-bit bytes are kept raw so
/// nonconforming encoders still round-trip exactly.
#[derive(Debug, Serialize)]
pub struct AvcConfig {
    pub configuration_version: u8,
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    length_size_raw: u8,
    sps_count_raw: u8,
    #[serde(skip)]
    pub sequence_parameter_sets: Vec<Vec<u8>>,
    #[serde(skip)]
    pub picture_parameter_sets: Vec<Vec<u8>>,
}

/// Dimensions and profile pulled out of a sequence parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

impl AvcConfig {
    pub fn nal_length_size(&self) -> u8 {
        (self.length_size_raw & 0x03) + 1
    }

    /// Walk the first sequence parameter set with the exp-Golomb reader and
    /// return profile, level, and coded dimensions.
    pub fn sps_info(&self) -> Result<SpsInfo> {
        let sps = self
            .sequence_parameter_sets
            .first()
            .ok_or(Error::BitsExhausted)?;
        parse_sps(sps)
    }
}

impl BoxFields for AvcConfig {
    fn kind_code(&self) -> FourCC {
        FourCC(*b"avcC")
    }
    fn content_size(&self) -> u64 {
        let sps: u64 = self
            .sequence_parameter_sets
            .iter()
            .map(|s| 2 + s.len() as u64)
            .sum();
        let pps: u64 = self
            .picture_parameter_sets
            .iter()
            .map(|p| 2 + p.len() as u64)
            .sum();
        6 + sps + 1 + pps
    }
    fn write_payload(&self, out: &mut dyn Write) -> Result<()> {
        out.write_u8(self.configuration_version)?;
        out.write_u8(self.profile_indication)?;
        out.write_u8(self.profile_compatibility)?;
        out.write_u8(self.level_indication)?;
        out.write_u8(self.length_size_raw)?;
        out.write_u8(self.sps_count_raw)?;
        for sps in &self.sequence_parameter_sets {
            out.write_u16::<BigEndian>(sps.len() as u16)?;
            out.write_all(sps)?;
        }
        out.write_u8(self.picture_parameter_sets.len() as u8)?;
        for pps in &self.picture_parameter_sets {
            out.write_u16::<BigEndian>(pps.len() as u16)?;
            out.write_all(pps)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn interpret_avcc(ctx: &KindContext, content: &[u8]) -> Result<Interpreted> {
    need(ctx, content, 6)?;
    let mut cur = Cursor::new(content);
    let configuration_version = cur.read_u8()?;
    let profile_indication = cur.read_u8()?;
    let profile_compatibility = cur.read_u8()?;
    let level_indication = cur.read_u8()?;
    let length_size_raw = cur.read_u8()?;
    let sps_count_raw = cur.read_u8()?;

    let mut sequence_parameter_sets = Vec::new();
    for _ in 0..(sps_count_raw & 0x1F) {
        need(ctx, content, cur.position() + 2)?;
        let len = cur.read_u16::<BigEndian>()? as u64;
        need(ctx, content, cur.position() + len)?;
        let start = cur.position() as usize;
        sequence_parameter_sets.push(content[start..start + len as usize].to_vec());
        cur.set_position(cur.position() + len);
    }

    need(ctx, content, cur.position() + 1)?;
    let pps_count = cur.read_u8()?;
    let mut picture_parameter_sets = Vec::new();
    for _ in 0..pps_count {
        need(ctx, content, cur.position() + 2)?;
        let len = cur.read_u16::<BigEndian>()? as u64;
        need(ctx, content, cur.position() + len)?;
        let start = cur.position() as usize;
        picture_parameter_sets.push(content[start..start + len as usize].to_vec());
        cur.set_position(cur.position() + len);
    }

    let consumed = cur.position();
    Ok((
        Box::new(AvcConfig {
            configuration_version,
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_raw,
            sps_count_raw,
            sequence_parameter_sets,
            picture_parameter_sets,
        }),
        split_dead(content, consumed),
    ))
}

fn parse_sps(sps: &[u8]) -> Result<SpsInfo> {
    if sps.len() < 4 {
        return Err(Error::BitsExhausted);
    }
    // Skip the NAL header byte.
    let mut r = codec::BitReader::new(&sps[1..]);
    let profile_idc = r.read_bits(8)? as u8;
    r.read_bits(8)?; // constraint flags + reserved
    let level_idc = r.read_bits(8)? as u8;
    r.read_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            r.read_bit()?; // separate_colour_plane_flag
        }
        r.read_ue()?; // bit_depth_luma_minus8
        r.read_ue()?; // bit_depth_chroma_minus8
        r.read_bit()?; // qpprime_y_zero_transform_bypass_flag
        if r.read_bit()? != 0 {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.read_bit()? != 0 {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    r.read_ue()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = r.read_ue()?;
    if pic_order_cnt_type == 0 {
        r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        r.read_bit()?; // delta_pic_order_always_zero_flag
        r.read_se()?; // offset_for_non_ref_pic
        r.read_se()?; // offset_for_top_to_bottom_field
        let cycle = r.read_ue()?;
        for _ in 0..cycle {
            r.read_se()?;
        }
    }
    r.read_ue()?; // max_num_ref_frames
    r.read_bit()?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs_minus1 = r.read_ue()?;
    let pic_height_in_map_units_minus1 = r.read_ue()?;
    let frame_mbs_only = r.read_bit()?;
    if frame_mbs_only == 0 {
        r.read_bit()?; // mb_adaptive_frame_field_flag
    }
    r.read_bit()?; // direct_8x8_inference_flag

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if r.read_bit()? != 0 {
        crop_left = r.read_ue()?;
        crop_right = r.read_ue()?;
        crop_top = r.read_ue()?;
        crop_bottom = r.read_ue()?;
    }

    let width = (pic_width_in_mbs_minus1 + 1) * 16 - (crop_left + crop_right) * 2;
    let frame_height = (2 - frame_mbs_only) * (pic_height_in_map_units_minus1 + 1) * 16;
    let height = frame_height - (crop_top + crop_bottom) * 2 * (2 - frame_mbs_only);

    Ok(SpsInfo {
        profile_idc,
        level_idc,
        width,
        height,
    })
}

fn skip_scaling_list(r: &mut codec::BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}
