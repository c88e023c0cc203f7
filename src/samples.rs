//! Sample resolution: from a track's classical tables (stsc/stco/stsz) or
//! its movie fragments (moof/traf/trun with tfhd/trex defaults) to one flat
//! index of `(offset, size)` pairs plus timing and sync flags, and sample
//! byte retrieval through the window cache.

use crate::boxes::{BoxFields, BoxNode, FourCC};
use crate::error::{Error, Result};
use crate::kinds::{
    Co64, Ctts, CttsEntry, Hdlr, Mdhd, Stco, Stsc, StscEntry, Stss, Stsz, Stts, SttsEntry, Tfdt,
    Tfhd, Tkhd, Trex, Trun, SAMPLE_IS_NON_SYNC,
};
use crate::mdat::{Backing, MediaRegion, WindowCache};
use crate::registry::Registry;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// One resolved sample: its physical byte range plus timing and sync state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SampleInfo {
    /// 0-based index in offset order.
    pub index: u32,
    /// Absolute byte offset in the overall stream.
    pub offset: u64,
    pub size: u32,
    /// Decode time in track timescale units.
    pub dts: u64,
    /// Presentation time: dts plus the composition offset, when present.
    pub pts: i64,
    pub duration: u32,
    pub is_sync: bool,
}

/// Per-track view over the resolved sample index and the media-data regions
/// that back it. Built once; retrieval is safe for concurrent reads.
#[derive(Debug)]
pub struct Track {
    pub track_id: u32,
    pub handler_type: Option<FourCC>,
    pub timescale: u32,
    pub duration: u64,
    pub language: Option<String>,
    samples: Vec<SampleInfo>,
    regions: Vec<MediaRegion>,
    backing: Backing,
    cache: WindowCache,
}

impl Track {
    pub fn sample_count(&self) -> u32 {
        self.samples.len() as u32
    }

    pub fn samples(&self) -> &[SampleInfo] {
        &self.samples
    }

    pub fn sample_offset_and_size(&self, index: u32) -> Option<(u64, u32)> {
        self.samples
            .get(index as usize)
            .map(|s| (s.offset, s.size))
    }

    /// Fetch one sample's bytes through the window cache. Fails with a named
    /// error when the sample's range does not lie entirely within a single
    /// media-data region.
    pub fn read_sample_bytes(&self, index: u32) -> Result<Vec<u8>> {
        let sample = self.samples.get(index as usize).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("sample index {} out of range", index),
            ))
        })?;
        let region = self
            .regions
            .iter()
            .find(|r| r.contains(sample.offset, sample.size as u64))
            .ok_or(Error::SampleOutsideMediaData {
                index,
                offset: sample.offset,
                size: sample.size,
            })?;
        self.cache
            .read(&self.backing, region, sample.offset, sample.size as u64)
    }

    pub fn window_cache(&self) -> &WindowCache {
        &self.cache
    }
}

/// Resolve every track in the movie: classical samples first, fragment
/// samples appended, the final index globally sorted by offset.
pub(crate) fn resolve_tracks(
    boxes: &mut [BoxNode],
    registry: &Registry,
    backing: &Backing,
) -> Result<Vec<Track>> {
    let regions = collect_media_regions(boxes);

    // trex defaults, keyed by track id.
    let mut trexes: HashMap<u32, Trex> = HashMap::new();
    if let Some(mvex) = path_mut(boxes, &[b"moov", b"mvex"]) {
        if let Some(children) = mvex.children_mut() {
            for child in children.iter_mut() {
                if let Some(trex) = child.fields::<Trex>(registry)? {
                    trexes.insert(trex.track_id, *trex);
                }
            }
        }
    }

    // Pass 1: per-track headers and classical tables out of moov.
    let mut tracks = Vec::new();
    if let Some(moov) = top_mut(boxes, *b"moov") {
        let trak = FourCC(*b"trak");
        if let Some(children) = moov.children_mut() {
            for child in children.iter_mut().filter(|c| c.header.typ == trak) {
                match resolve_track_header(child, registry)? {
                    Some(t) => tracks.push(t),
                    None => warn!("trak without usable headers, skipped"),
                }
            }
        }
    }

    // Pass 2: fragment samples from every top-level moof, in file order.
    for node in boxes.iter_mut() {
        if node.header.typ != FourCC(*b"moof") {
            continue;
        }
        let moof_start = node.header.start;
        let traf = FourCC(*b"traf");
        let Some(children) = node.children_mut() else {
            continue;
        };
        for traf_node in children.iter_mut().filter(|c| c.header.typ == traf) {
            resolve_traf(traf_node, moof_start, registry, &trexes, &mut tracks)?;
        }
    }

    // Offset order is the exposed order: classical and fragment samples
    // interleave only by offset, not by declaration.
    Ok(tracks
        .into_iter()
        .map(|t| t.finish(regions.clone(), backing.clone()))
        .collect())
}

/// Track under construction: headers plus accumulated samples.
struct PendingTrack {
    track_id: u32,
    handler_type: Option<FourCC>,
    timescale: u32,
    duration: u64,
    language: Option<String>,
    samples: Vec<SampleInfo>,
    /// Decode-time cursor for fragments without a tfdt.
    dts_cursor: u64,
}

impl PendingTrack {
    fn finish(mut self, regions: Vec<MediaRegion>, backing: Backing) -> Track {
        self.samples.sort_by_key(|s| s.offset);
        for (i, s) in self.samples.iter_mut().enumerate() {
            s.index = i as u32;
        }
        Track {
            track_id: self.track_id,
            handler_type: self.handler_type,
            timescale: self.timescale,
            duration: self.duration,
            language: self.language,
            samples: self.samples,
            regions,
            backing,
            cache: WindowCache::new(),
        }
    }
}

fn resolve_track_header(
    trak: &mut BoxNode,
    registry: &Registry,
) -> Result<Option<PendingTrack>> {
    let track_id = match child_fields::<Tkhd>(trak, &[b"tkhd"], registry)? {
        Some(tkhd) => tkhd.track_id,
        None => return Ok(None),
    };

    let (timescale, duration, language) =
        match child_fields::<Mdhd>(trak, &[b"mdia", b"mdhd"], registry)? {
            Some(mdhd) => (mdhd.timescale, mdhd.duration, Some(mdhd.language.clone())),
            None => (0, 0, None),
        };
    let handler_type =
        child_fields::<Hdlr>(trak, &[b"mdia", b"hdlr"], registry)?.map(|h| h.handler_type);

    let mut track = PendingTrack {
        track_id,
        handler_type,
        timescale,
        duration,
        language,
        samples: Vec::new(),
        dts_cursor: 0,
    };

    if let Some(stbl) = path_node_mut(trak, &[b"mdia", b"minf", b"stbl"]) {
        if let Some(tables) = classical_tables(stbl, registry)? {
            expand_classical(&tables, &mut track);
        }
    }

    Ok(Some(track))
}

/// The classical sample tables, cloned out of the interpreted tree.
struct ClassicalTables {
    stts: Vec<SttsEntry>,
    ctts: Vec<CttsEntry>,
    stsc: Vec<StscEntry>,
    uniform_size: u32,
    sample_count: u32,
    sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    sync_numbers: Option<Vec<u32>>,
}

impl ClassicalTables {
    fn size_of(&self, index: u32) -> Option<u32> {
        if self.uniform_size != 0 {
            (index < self.sample_count).then_some(self.uniform_size)
        } else {
            self.sizes.get(index as usize).copied()
        }
    }
}

fn classical_tables(
    stbl: &mut BoxNode,
    registry: &Registry,
) -> Result<Option<ClassicalTables>> {
    let (uniform_size, sample_count, sizes) =
        match child_fields::<Stsz>(stbl, &[b"stsz"], registry)? {
            Some(stsz) => (stsz.sample_size, stsz.sample_count, stsz.sample_sizes.clone()),
            None => return Ok(None),
        };

    let chunk_offsets = match child_fields::<Stco>(stbl, &[b"stco"], registry)? {
        Some(stco) => stco.chunk_offsets.iter().map(|&o| o as u64).collect(),
        None => match child_fields::<Co64>(stbl, &[b"co64"], registry)? {
            Some(co64) => co64.chunk_offsets.clone(),
            None => return Ok(None),
        },
    };

    let stsc = match child_fields::<Stsc>(stbl, &[b"stsc"], registry)? {
        Some(stsc) => stsc.entries.clone(),
        None => return Ok(None),
    };

    let stts = child_fields::<Stts>(stbl, &[b"stts"], registry)?
        .map(|t| t.entries.clone())
        .unwrap_or_default();
    let ctts = child_fields::<Ctts>(stbl, &[b"ctts"], registry)?
        .map(|t| t.entries.clone())
        .unwrap_or_default();
    let sync_numbers =
        child_fields::<Stss>(stbl, &[b"stss"], registry)?.map(|t| t.sample_numbers.clone());

    Ok(Some(ClassicalTables {
        stts,
        ctts,
        stsc,
        uniform_size,
        sample_count,
        sizes,
        chunk_offsets,
        sync_numbers,
    }))
}

/// Run-length expand samples-per-chunk across the chunk offsets, summing
/// preceding sample sizes within each chunk.
fn expand_classical(tables: &ClassicalTables, track: &mut PendingTrack) {
    let chunk_count = tables.chunk_offsets.len() as u32;
    let mut stts_walk = RunWalker::new(&tables.stts, |e| (e.sample_count, e.sample_delta));
    let mut ctts_walk = RunWalker::new(&tables.ctts, |e| (e.sample_count, e.sample_offset));

    let mut sample_index = 0u32;
    let mut dts = 0u64;

    'chunks: for chunk_number in 1..=chunk_count {
        let per_chunk = samples_per_chunk(&tables.stsc, chunk_number);
        let mut offset = tables.chunk_offsets[chunk_number as usize - 1];

        for _ in 0..per_chunk {
            if sample_index >= tables.sample_count {
                break 'chunks;
            }
            let Some(size) = tables.size_of(sample_index) else {
                warn!(
                    track_id = track.track_id,
                    sample_index, "sample size table shorter than declared count"
                );
                break 'chunks;
            };
            let duration = stts_walk.next().unwrap_or(0);
            let composition = ctts_walk.next().unwrap_or(0);
            let is_sync = match &tables.sync_numbers {
                Some(numbers) => numbers.binary_search(&(sample_index + 1)).is_ok(),
                None => true,
            };

            track.samples.push(SampleInfo {
                index: sample_index,
                offset,
                size,
                dts,
                pts: dts as i64 + composition as i64,
                duration,
                is_sync,
            });

            offset += size as u64;
            dts += duration as u64;
            sample_index += 1;
        }
    }

    track.dts_cursor = dts;
}

/// Samples-per-chunk for a 1-based chunk number: the entry with the largest
/// `first_chunk` not past it.
fn samples_per_chunk(entries: &[StscEntry], chunk_number: u32) -> u32 {
    let mut current = 0;
    for e in entries {
        if e.first_chunk > chunk_number {
            break;
        }
        current = e.samples_per_chunk;
    }
    current
}

/// Run-length (count, value) walker over sample-table entries.
struct RunWalker<'a, E, V> {
    entries: &'a [E],
    project: fn(&E) -> (u32, V),
    entry: usize,
    used: u32,
}

impl<'a, E, V: Copy> RunWalker<'a, E, V> {
    fn new(entries: &'a [E], project: fn(&E) -> (u32, V)) -> Self {
        Self {
            entries,
            project,
            entry: 0,
            used: 0,
        }
    }

    fn next(&mut self) -> Option<V> {
        while self.entry < self.entries.len() {
            let (count, value) = (self.project)(&self.entries[self.entry]);
            if self.used < count {
                self.used += 1;
                return Some(value);
            }
            self.entry += 1;
            self.used = 0;
        }
        None
    }
}

/// Resolve one track fragment into the owning track's sample list.
fn resolve_traf(
    traf: &mut BoxNode,
    moof_start: u64,
    registry: &Registry,
    trexes: &HashMap<u32, Trex>,
    tracks: &mut [PendingTrack],
) -> Result<()> {
    let Some(tfhd) = child_fields::<Tfhd>(traf, &[b"tfhd"], registry)? else {
        warn!(moof_start, "traf without tfhd, skipped");
        return Ok(());
    };
    let track_id = tfhd.track_id;
    let base = tfhd.base_data_offset.unwrap_or(moof_start);
    let default_duration = tfhd.default_sample_duration;
    let default_size = tfhd.default_sample_size;
    let default_flags = tfhd.default_sample_flags;

    let Some(track) = tracks.iter_mut().find(|t| t.track_id == track_id) else {
        warn!(track_id, "fragment for unknown track, skipped");
        return Ok(());
    };
    let trex = trexes.get(&track_id);

    if let Some(tfdt) = child_fields::<Tfdt>(traf, &[b"tfdt"], registry)? {
        track.dts_cursor = tfdt.base_media_decode_time;
    }

    // Runs without an explicit data offset continue where the previous run
    // of this fragment ended.
    let mut run_cursor = base;
    let trun_cc = FourCC(*b"trun");
    let Some(children) = traf.children_mut() else {
        return Ok(());
    };
    for node in children.iter_mut().filter(|c| c.header.typ == trun_cc) {
        let Some(trun) = node.fields::<Trun>(registry)? else {
            continue;
        };
        let mut offset = match trun.data_offset {
            Some(d) => base.wrapping_add_signed(d as i64),
            None => run_cursor,
        };

        for (i, entry) in trun.entries.iter().enumerate() {
            let size = entry
                .size
                .or(default_size)
                .or(trex.map(|t| t.default_sample_size))
                .ok_or(Error::NoSampleSize { track_id })?;
            let duration = entry
                .duration
                .or(default_duration)
                .or(trex.map(|t| t.default_sample_duration))
                .unwrap_or(0);
            // Sync precedence: entry flags, then first-sample flags, then the
            // fragment default, then the track default.
            let flags = entry
                .flags
                .or(if i == 0 { trun.first_sample_flags } else { None })
                .or(default_flags)
                .or(trex.map(|t| t.default_sample_flags))
                .unwrap_or(0);

            let dts = track.dts_cursor;
            track.samples.push(SampleInfo {
                index: 0,
                offset,
                size,
                dts,
                pts: dts as i64 + entry.composition_offset.unwrap_or(0) as i64,
                duration,
                is_sync: flags & SAMPLE_IS_NON_SYNC == 0,
            });

            offset += size as u64;
            track.dts_cursor += duration as u64;
        }
        run_cursor = offset;
    }

    Ok(())
}

// ---------- tree navigation helpers ----------

fn top_mut(boxes: &mut [BoxNode], typ: [u8; 4]) -> Option<&mut BoxNode> {
    boxes.iter_mut().find(|b| b.header.typ == FourCC(typ))
}

fn path_mut<'a>(boxes: &'a mut [BoxNode], path: &[&[u8; 4]]) -> Option<&'a mut BoxNode> {
    let (first, rest) = path.split_first()?;
    let node = top_mut(boxes, **first)?;
    path_node_mut_steps(node, rest)
}

fn path_node_mut<'a>(node: &'a mut BoxNode, path: &[&[u8; 4]]) -> Option<&'a mut BoxNode> {
    path_node_mut_steps(node, path)
}

fn path_node_mut_steps<'a>(
    mut node: &'a mut BoxNode,
    path: &[&[u8; 4]],
) -> Option<&'a mut BoxNode> {
    for part in path {
        node = node.find_child_mut(FourCC(**part))?;
    }
    Some(node)
}

/// Interpret and downcast a descendant box, navigating a dotted path of
/// children below `node`.
fn child_fields<'a, T: BoxFields + 'static>(
    node: &'a mut BoxNode,
    path: &[&[u8; 4]],
    registry: &Registry,
) -> Result<Option<&'a T>> {
    match path_node_mut(node, path) {
        Some(target) => target.fields::<T>(registry),
        None => Ok(None),
    }
}

pub(crate) fn collect_media_regions(boxes: &[BoxNode]) -> Vec<MediaRegion> {
    fn walk(node: &BoxNode, out: &mut Vec<MediaRegion>) {
        match &node.payload {
            crate::boxes::Payload::Media(region) => out.push(region.clone()),
            crate::boxes::Payload::Children { children, .. } => {
                for c in children {
                    walk(c, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    for b in boxes {
        walk(b, &mut out);
    }
    out
}
