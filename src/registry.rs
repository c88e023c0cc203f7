//! Dispatch registry: maps a box's identity, in its parent-type context, to
//! a node class (container / leaf / media) and a payload-interpreter factory.
//!
//! Lookup falls back through `(parent, type)` -> `(type)` -> `(parent, uuid +
//! extended type)` -> `(uuid + extended type)` -> `(uuid)` -> the raw default
//! entry. The table is open for extension: built-in entries, caller-supplied
//! entries, and JSON mapping-file entries all merge into the same maps, and
//! an unresolvable type still parses as a generic raw-payload box.

use crate::boxes::{BoxFields, BoxHeader, BoxKey, FourCC};
use crate::error::{Error, Result};
use crate::kinds;
use serde::Deserialize;
use std::collections::HashMap;

/// How the parser treats a box's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Ordered child boxes, preceded by `prelude` bytes kept verbatim
    /// (0 for plain containers, 4 for full-box containers, 8 for sample
    /// descriptions, 78/28 for visual/audio sample entries).
    Container { prelude: u16 },
    /// Leaf content captured raw, interpreted lazily on demand.
    Leaf,
    /// Raw media-data region; payload is never materialized into the tree.
    Media,
}

/// Construction context handed to interpreter factories: the resolved box's
/// own type, its parent-type context, and the extended type for uuid boxes.
pub struct KindContext<'a> {
    pub typ: FourCC,
    pub parent: Option<&'a BoxKey>,
    pub uuid: Option<[u8; 16]>,
}

/// Interprets content bytes into fields plus verbatim trailing dead bytes.
pub type InterpretFn = fn(&KindContext, &[u8]) -> Result<(Box<dyn BoxFields>, Vec<u8>)>;

#[derive(Clone, Copy, Debug)]
pub struct KindEntry {
    /// Human-readable name, for dump output and mapping diagnostics.
    pub name: &'static str,
    pub class: NodeClass,
    /// Absent for containers, media, and kinds kept verbatim.
    pub interpret: Option<InterpretFn>,
}

impl KindEntry {
    const fn container(name: &'static str, prelude: u16) -> Self {
        KindEntry {
            name,
            class: NodeClass::Container { prelude },
            interpret: None,
        }
    }

    const fn leaf(name: &'static str, interpret: InterpretFn) -> Self {
        KindEntry {
            name,
            class: NodeClass::Leaf,
            interpret: Some(interpret),
        }
    }

    const fn raw(name: &'static str) -> Self {
        KindEntry {
            name,
            class: NodeClass::Leaf,
            interpret: None,
        }
    }

    const fn media(name: &'static str) -> Self {
        KindEntry {
            name,
            class: NodeClass::Media,
            interpret: None,
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    by_parent_and_type: HashMap<(BoxKey, BoxKey), KindEntry>,
    by_type: HashMap<BoxKey, KindEntry>,
    /// Catch-all for uuid boxes whose extended type has no entry.
    uuid_fallback: Option<KindEntry>,
    /// Final fallback: generic raw payload, stored verbatim.
    default: KindEntry,
    /// Named kinds resolvable from mapping files.
    named_kinds: HashMap<&'static str, KindEntry>,
}

impl Registry {
    /// Empty registry: everything resolves to the raw default.
    pub fn new() -> Self {
        let mut named_kinds = HashMap::new();
        named_kinds.insert("raw", KindEntry::raw("unknown"));
        named_kinds.insert("container", KindEntry::container("container", 0));
        named_kinds.insert("full-container", KindEntry::container("full container", 4));
        named_kinds.insert("media", KindEntry::media("Media Data Box"));
        Self {
            by_parent_and_type: HashMap::new(),
            by_type: HashMap::new(),
            uuid_fallback: None,
            default: KindEntry::raw("unknown"),
            named_kinds,
        }
    }

    /// Registry preloaded with the built-in ISO-BMFF table.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for &(typ, entry) in BUILTIN {
            reg.by_type.insert(BoxKey::FourCC(FourCC(*typ)), entry);
        }
        for &(name, entry) in BUILTIN_NAMED {
            reg.named_kinds.insert(name, entry);
        }
        reg.uuid_fallback = Some(KindEntry::raw("User Extension Box"));
        reg
    }

    /// Add or override an entry keyed by type alone.
    pub fn with_entry(mut self, key: BoxKey, entry: KindEntry) -> Self {
        self.by_type.insert(key, entry);
        self
    }

    /// Add or override an entry qualified by parent-type context.
    pub fn with_scoped_entry(mut self, parent: BoxKey, key: BoxKey, entry: KindEntry) -> Self {
        self.by_parent_and_type.insert((parent, key), entry);
        self
    }

    /// Register a kind identifier that mapping files may refer to.
    pub fn with_named_kind(mut self, name: &'static str, entry: KindEntry) -> Self {
        self.named_kinds.insert(name, entry);
        self
    }

    /// Merge entries from a JSON mapping document over the current table.
    ///
    /// Each entry associates a box type (optionally qualified by parent type,
    /// or given as a uuid extended type) with a registered kind identifier:
    ///
    /// ```json
    /// { "entries": [
    ///   { "type": "crtt", "parent": "udta", "kind": "raw" },
    ///   { "uuid": "a2394f525a9b4f14a2446c427c648df4", "kind": "raw" }
    /// ] }
    /// ```
    pub fn apply_mapping(&mut self, json: &str) -> Result<()> {
        let file: MappingFile =
            serde_json::from_str(json).map_err(|e| Error::BadMapping(e.to_string()))?;
        for entry in file.entries {
            let kind = *self
                .named_kinds
                .get(entry.kind.as_str())
                .ok_or_else(|| Error::BadMapping(format!("unknown kind {:?}", entry.kind)))?;

            let key = match (&entry.typ, &entry.uuid) {
                (Some(t), None) => BoxKey::FourCC(
                    FourCC::from_str(t)
                        .ok_or_else(|| Error::BadMapping(format!("bad type {:?}", t)))?,
                ),
                (None, Some(u)) => {
                    let bytes = hex::decode(u)
                        .map_err(|e| Error::BadMapping(format!("bad uuid {:?}: {}", u, e)))?;
                    let arr: [u8; 16] = bytes
                        .try_into()
                        .map_err(|_| Error::BadMapping(format!("uuid {:?} is not 16 bytes", u)))?;
                    BoxKey::Uuid(arr)
                }
                _ => {
                    return Err(Error::BadMapping(
                        "entry needs exactly one of \"type\" or \"uuid\"".into(),
                    ));
                }
            };

            match &entry.parent {
                Some(p) => {
                    let parent = FourCC::from_str(p)
                        .ok_or_else(|| Error::BadMapping(format!("bad parent {:?}", p)))?;
                    self.by_parent_and_type
                        .insert((BoxKey::FourCC(parent), key), kind);
                }
                None => {
                    self.by_type.insert(key, kind);
                }
            }
        }
        Ok(())
    }

    /// Walk the fallback chain for a box identity in its parent context.
    /// Never fails: unresolvable identities get the raw default entry.
    pub fn resolve(&self, parent: Option<&BoxKey>, key: &BoxKey) -> &KindEntry {
        if let Some(p) = parent {
            if let Some(e) = self.by_parent_and_type.get(&(*p, *key)) {
                return e;
            }
        }
        if let Some(e) = self.by_type.get(key) {
            return e;
        }
        if let BoxKey::Uuid(_) = key {
            if let Some(e) = &self.uuid_fallback {
                return e;
            }
        }
        &self.default
    }

    /// Interpret a leaf's content bytes, falling back to the verbatim raw
    /// kind when no interpreter is registered.
    pub fn interpret_payload(
        &self,
        parent: Option<&BoxKey>,
        header: &BoxHeader,
        content: &[u8],
    ) -> Result<(Box<dyn BoxFields>, Vec<u8>)> {
        let entry = self.resolve(parent, &header.key());
        let ctx = KindContext {
            typ: header.typ,
            parent,
            uuid: header.uuid,
        };
        match entry.interpret {
            Some(f) => f(&ctx, content),
            None => kinds::interpret_raw(&ctx, content),
        }
    }

    pub fn name_of(&self, parent: Option<&BoxKey>, key: &BoxKey) -> &'static str {
        self.resolve(parent, key).name
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Deserialize)]
struct MappingFile {
    entries: Vec<MappingEntry>,
}

#[derive(Deserialize)]
struct MappingEntry {
    #[serde(rename = "type")]
    typ: Option<String>,
    parent: Option<String>,
    uuid: Option<String>,
    kind: String,
}

/// Built-in table. Containers and media classes drive the parser; leaf
/// entries with interpreters cover the tables the sample resolver walks.
static BUILTIN: &[(&[u8; 4], KindEntry)] = &[
    // plain containers
    (b"moov", KindEntry::container("Movie Box", 0)),
    (b"trak", KindEntry::container("Track Box", 0)),
    (b"mdia", KindEntry::container("Media Box", 0)),
    (b"minf", KindEntry::container("Media Information Box", 0)),
    (b"stbl", KindEntry::container("Sample Table Box", 0)),
    (b"edts", KindEntry::container("Edit Box", 0)),
    (b"udta", KindEntry::container("User Data Box", 0)),
    (b"dinf", KindEntry::container("Data Information Box", 0)),
    (b"moof", KindEntry::container("Movie Fragment Box", 0)),
    (b"traf", KindEntry::container("Track Fragment Box", 0)),
    (b"mvex", KindEntry::container("Movie Extends Box", 0)),
    (b"mfra", KindEntry::container("Movie Fragment Random Access Box", 0)),
    (b"sinf", KindEntry::container("Protection Scheme Information Box", 0)),
    (b"schi", KindEntry::container("Scheme Information Box", 0)),
    // full-box containers: version/flags prelude
    (b"meta", KindEntry::container("Meta Box", 4)),
    // sample description: version/flags + entry count, then sample entries
    (b"stsd", KindEntry::container("Sample Description Box", 8)),
    // sample entries: fixed field block, then child boxes (avcC, pasp, esds)
    (b"avc1", KindEntry::container("AVC Sample Entry", 78)),
    (b"avc3", KindEntry::container("AVC Sample Entry", 78)),
    (b"hvc1", KindEntry::container("HEVC Sample Entry", 78)),
    (b"hev1", KindEntry::container("HEVC Sample Entry", 78)),
    (b"encv", KindEntry::container("Encrypted Video Sample Entry", 78)),
    (b"mp4a", KindEntry::container("MP4 Audio Sample Entry", 28)),
    (b"enca", KindEntry::container("Encrypted Audio Sample Entry", 28)),
    // media data
    (b"mdat", KindEntry::media("Media Data Box")),
    // interpreted leaves
    (b"ftyp", KindEntry::leaf("File Type Box", kinds::interpret_ftyp)),
    (b"styp", KindEntry::leaf("Segment Type Box", kinds::interpret_ftyp)),
    (b"mvhd", KindEntry::leaf("Movie Header Box", kinds::interpret_mvhd)),
    (b"tkhd", KindEntry::leaf("Track Header Box", kinds::interpret_tkhd)),
    (b"mdhd", KindEntry::leaf("Media Header Box", kinds::interpret_mdhd)),
    (b"hdlr", KindEntry::leaf("Handler Reference Box", kinds::interpret_hdlr)),
    (b"stts", KindEntry::leaf("Decoding Time to Sample Box", kinds::interpret_stts)),
    (b"ctts", KindEntry::leaf("Composition Time to Sample Box", kinds::interpret_ctts)),
    (b"stsc", KindEntry::leaf("Sample to Chunk Box", kinds::interpret_stsc)),
    (b"stsz", KindEntry::leaf("Sample Size Box", kinds::interpret_stsz)),
    (b"stco", KindEntry::leaf("Chunk Offset Box", kinds::interpret_stco)),
    (b"co64", KindEntry::leaf("64-bit Chunk Offset Box", kinds::interpret_co64)),
    (b"stss", KindEntry::leaf("Sync Sample Box", kinds::interpret_stss)),
    (b"mehd", KindEntry::leaf("Movie Extends Header Box", kinds::interpret_mehd)),
    (b"trex", KindEntry::leaf("Track Extends Box", kinds::interpret_trex)),
    (b"mfhd", KindEntry::leaf("Movie Fragment Header Box", kinds::interpret_mfhd)),
    (b"tfhd", KindEntry::leaf("Track Fragment Header Box", kinds::interpret_tfhd)),
    (b"tfdt", KindEntry::leaf("Track Fragment Decode Time Box", kinds::interpret_tfdt)),
    (b"trun", KindEntry::leaf("Track Run Box", kinds::interpret_trun)),
    (b"avcC", KindEntry::leaf("AVC Configuration Box", kinds::interpret_avcc)),
    (b"esds", KindEntry::leaf("Elementary Stream Descriptor Box", kinds::interpret_esds)),
    // verbatim leaves worth a name in dumps
    (b"free", KindEntry::raw("Free Space Box")),
    (b"skip", KindEntry::raw("Free Space Box")),
    (b"wide", KindEntry::raw("Wide Box")),
    (b"sidx", KindEntry::raw("Segment Index Box")),
    (b"pssh", KindEntry::raw("Protection System Specific Header Box")),
    (b"elst", KindEntry::raw("Edit List Box")),
    (b"dref", KindEntry::raw("Data Reference Box")),
    (b"vmhd", KindEntry::raw("Video Media Header Box")),
    (b"smhd", KindEntry::raw("Sound Media Header Box")),
    (b"stz2", KindEntry::raw("Compact Sample Size Box")),
];

/// Kind identifiers mapping files may name, beyond the four generic ones
/// registered by [`Registry::new`].
static BUILTIN_NAMED: &[(&str, KindEntry)] = &[
    ("sample-description", KindEntry::container("Sample Description Box", 8)),
    ("visual-sample-entry", KindEntry::container("Visual Sample Entry", 78)),
    ("audio-sample-entry", KindEntry::container("Audio Sample Entry", 28)),
];
