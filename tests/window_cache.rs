use mp4tree::{Backing, Error, MediaRegion, Mp4File, WindowCache};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

fn boxb(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + payload.len());
    v.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    v.extend_from_slice(typ);
    v.extend_from_slice(payload);
    v
}

fn full(version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + body.len());
    v.push(version);
    v.extend_from_slice(&flags.to_be_bytes()[1..]);
    v.extend_from_slice(body);
    v
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// One-track flat file: four 100-byte samples in one chunk at offset 600.
fn small_classical_file() -> Vec<u8> {
    let stbl = {
        let mut v = Vec::new();
        let mut stts = u32s(&[1]);
        stts.extend_from_slice(&u32s(&[4, 10]));
        v.extend_from_slice(&boxb(b"stts", &full(0, 0, &stts)));
        let mut stsc = u32s(&[1]);
        stsc.extend_from_slice(&u32s(&[1, 4, 1]));
        v.extend_from_slice(&boxb(b"stsc", &full(0, 0, &stsc)));
        v.extend_from_slice(&boxb(b"stsz", &full(0, 0, &u32s(&[100, 4]))));
        let mut stco = u32s(&[1]);
        stco.extend_from_slice(&u32s(&[600]));
        v.extend_from_slice(&boxb(b"stco", &full(0, 0, &stco)));
        boxb(b"stbl", &v)
    };

    let mut tkhd_body = vec![0u8; 80];
    tkhd_body[8..12].copy_from_slice(&1u32.to_be_bytes());
    let mut mdhd_body = vec![0u8; 8];
    mdhd_body.extend_from_slice(&1000u32.to_be_bytes());
    mdhd_body.extend_from_slice(&[0u8; 8]);

    let mut mdia = boxb(b"mdhd", &full(0, 0, &mdhd_body));
    mdia.extend_from_slice(&boxb(b"minf", &stbl));
    let mut trak = boxb(b"tkhd", &full(0, 0, &tkhd_body));
    trak.extend_from_slice(&boxb(b"mdia", &mdia));
    let moov = boxb(b"moov", &boxb(b"trak", &trak));

    let mut data = moov;
    let pad = 600 - 8 - data.len();
    data.extend_from_slice(&boxb(b"free", &vec![0u8; pad - 8]));
    let mut mdat = vec![0u8; 400];
    for (i, b) in mdat.iter_mut().enumerate() {
        *b = ((600 + i) % 251) as u8;
    }
    data.extend_from_slice(&boxb(b"mdat", &mdat));
    data
}

#[test]
fn repeated_reads_reuse_one_window() {
    let mut file = Mp4File::parse_slice(small_classical_file()).unwrap();
    let tracks = file.tracks().unwrap();
    let track = &tracks[0];

    let a = track.read_sample_bytes(0).unwrap();
    let b = track.read_sample_bytes(1).unwrap();
    let c = track.read_sample_bytes(3).unwrap();
    assert_eq!(track.window_cache().cached_windows(), 1);
    assert_eq!(a[0], (600 % 251) as u8);
    assert_eq!(b[0], (700 % 251) as u8);
    assert_eq!(c[99], ((600 + 399) % 251) as u8);
}

#[test]
fn cleared_cache_refetches_without_corruption() {
    let mut file = Mp4File::parse_slice(small_classical_file()).unwrap();
    let tracks = file.tracks().unwrap();
    let track = &tracks[0];

    let before = track.read_sample_bytes(2).unwrap();
    track.window_cache().clear();
    assert_eq!(track.window_cache().cached_windows(), 0);
    let after = track.read_sample_bytes(2).unwrap();
    assert_eq!(before, after);
}

#[test]
fn window_count_is_bounded() {
    // Direct cache exercise: a tiny window length and a single slot force
    // eviction on every distant access.
    let backing_bytes: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let backing = Backing::Buffer(Arc::from(backing_bytes.into_boxed_slice()));
    let region = MediaRegion {
        start: 0,
        len: 2048,
        header_start: 0,
        header_bytes: Vec::new(),
        data: None,
    };
    let cache = WindowCache::with_limits(64, 1);

    let first = cache.read(&backing, &region, 0, 16).unwrap();
    let far = cache.read(&backing, &region, 1500, 16).unwrap();
    assert_eq!(cache.cached_windows(), 1);

    // Evicted window recreates on demand with identical bytes.
    let again = cache.read(&backing, &region, 0, 16).unwrap();
    assert_eq!(first, again);
    assert_eq!(far[0], (1500 % 251) as u8);
}

#[test]
fn windows_are_clamped_to_the_region() {
    let backing_bytes = vec![7u8; 100];
    let backing = Backing::Buffer(Arc::from(backing_bytes.into_boxed_slice()));
    let region = MediaRegion {
        start: 20,
        len: 60,
        header_start: 12,
        header_bytes: Vec::new(),
        data: None,
    };
    let cache = WindowCache::with_limits(1024 * 1024, 4);

    // A window starting near the region end must not reach past it.
    let bytes = cache.read(&backing, &region, 70, 10).unwrap();
    assert_eq!(bytes.len(), 10);
}

#[test]
fn file_backed_reads_go_through_mapped_windows() {
    let data = small_classical_file();
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&data).unwrap();
    tmp.flush().unwrap();

    let mut file = Mp4File::open(tmp.path()).unwrap();
    let tracks = file.tracks().unwrap();
    let track = &tracks[0];

    let bytes = track.read_sample_bytes(1).unwrap();
    assert_eq!(bytes.len(), 100);
    for (i, b) in bytes.iter().enumerate() {
        assert_eq!(*b, ((700 + i) % 251) as u8);
    }

    // Serialization from the file backing is also byte-exact.
    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn mutated_backing_store_is_detected() {
    let data = small_classical_file();
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&data).unwrap();
    tmp.flush().unwrap();

    let mut file = Mp4File::open(tmp.path()).unwrap();
    let tracks = file.tracks().unwrap();
    let track = &tracks[0];
    assert!(track.read_sample_bytes(0).is_ok());

    // Rewrite the mdat header underneath the parsed tree.
    let mdat_header_start = 600 - 8;
    tmp.as_file_mut()
        .seek(SeekFrom::Start(mdat_header_start))
        .unwrap();
    tmp.as_file_mut().write_all(b"XXXXXXXX").unwrap();
    tmp.as_file_mut().flush().unwrap();

    track.window_cache().clear();
    let err = track.read_sample_bytes(0).unwrap_err();
    assert!(matches!(err, Error::BackingStoreChanged { .. }));
}
