use mp4tree::{Error, FourCC, Mp4File};

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

fn tkhd(track_id: u32) -> Vec<u8> {
    let mut body = vec![0u8; 80];
    body[8..12].copy_from_slice(&track_id.to_be_bytes());
    boxb(b"tkhd", &full(0, 0, &body))
}

fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 8]); // creation + modification
    body.extend_from_slice(&timescale.to_be_bytes());
    body.extend_from_slice(&duration.to_be_bytes());
    body.extend_from_slice(&0x55C4u16.to_be_bytes()); // "und"
    body.extend_from_slice(&[0u8; 2]);
    boxb(b"mdhd", &full(0, 0, &body))
}

fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(handler);
    body.extend_from_slice(&[0u8; 12]);
    body.extend_from_slice(b"handler\0");
    boxb(b"hdlr", &full(0, 0, &body))
}

struct ClassicalSpec<'a> {
    stsc: &'a [(u32, u32)],
    chunk_offsets: &'a [u32],
    uniform_size: u32,
    sample_count: u32,
    stts: &'a [(u32, u32)],
    stss: Option<&'a [u32]>,
}

fn stbl(spec: &ClassicalSpec) -> Vec<u8> {
    let mut out = Vec::new();

    let mut stts = u32s(&[spec.stts.len() as u32]);
    for &(count, delta) in spec.stts {
        stts.extend_from_slice(&u32s(&[count, delta]));
    }
    out.extend_from_slice(&boxb(b"stts", &full(0, 0, &stts)));

    let mut stsc = u32s(&[spec.stsc.len() as u32]);
    for &(first_chunk, per_chunk) in spec.stsc {
        stsc.extend_from_slice(&u32s(&[first_chunk, per_chunk, 1]));
    }
    out.extend_from_slice(&boxb(b"stsc", &full(0, 0, &stsc)));

    let stsz = u32s(&[spec.uniform_size, spec.sample_count]);
    out.extend_from_slice(&boxb(b"stsz", &full(0, 0, &stsz)));

    let mut stco = u32s(&[spec.chunk_offsets.len() as u32]);
    stco.extend_from_slice(&u32s(spec.chunk_offsets));
    out.extend_from_slice(&boxb(b"stco", &full(0, 0, &stco)));

    if let Some(sync) = spec.stss {
        let mut stss = u32s(&[sync.len() as u32]);
        stss.extend_from_slice(&u32s(sync));
        out.extend_from_slice(&boxb(b"stss", &full(0, 0, &stss)));
    }

    boxb(b"stbl", &out)
}

/// A flat file whose mdat payload spans `[mdat_payload_start, end)` and is
/// filled with a position-derived byte pattern.
fn classical_file(spec: &ClassicalSpec, mdat_payload_start: u64, mdat_len: u64) -> Vec<u8> {
    let minf = boxb(b"minf", &stbl(spec));
    let mut mdia = mdhd(1000, 0);
    mdia.extend_from_slice(&hdlr(b"vide"));
    mdia.extend_from_slice(&minf);
    let mut trak = tkhd(1);
    trak.extend_from_slice(&boxb(b"mdia", &mdia));
    let moov = boxb(b"moov", &boxb(b"trak", &trak));

    let mut data = Vec::new();
    let mut ftyp = Vec::new();
    ftyp.extend_from_slice(b"isom");
    ftyp.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(&boxb(b"ftyp", &ftyp));
    data.extend_from_slice(&moov);

    let pad = mdat_payload_start - 8 - data.len() as u64;
    assert!(pad >= 8, "layout too tight: need {} pad bytes", pad);
    data.extend_from_slice(&boxb(b"free", &vec![0u8; pad as usize - 8]));

    let mut mdat_payload = vec![0u8; mdat_len as usize];
    for (i, b) in mdat_payload.iter_mut().enumerate() {
        *b = ((mdat_payload_start + i as u64) % 251) as u8;
    }
    data.extend_from_slice(&boxb(b"mdat", &mdat_payload));
    assert_eq!(data.len() as u64, mdat_payload_start + mdat_len);
    data
}

#[test]
fn classical_expansion_matches_chunk_layout() {
    // Chunk 1 holds samples 1..=2 at offset 1000, chunk 2 holds sample 3 at
    // offset 5000, every sample 200 bytes.
    let spec = ClassicalSpec {
        stsc: &[(1, 2), (2, 1)],
        chunk_offsets: &[1000, 5000],
        uniform_size: 200,
        sample_count: 3,
        stts: &[(3, 100)],
        stss: Some(&[1]),
    };
    let data = classical_file(&spec, 1000, 4600);

    let mut file = Mp4File::parse_slice(data).unwrap();
    let tracks = file.tracks().unwrap();
    assert_eq!(tracks.len(), 1);

    let track = &tracks[0];
    assert_eq!(track.track_id, 1);
    assert_eq!(track.handler_type, Some(FourCC(*b"vide")));
    assert_eq!(track.timescale, 1000);
    assert_eq!(track.sample_count(), 3);

    let offsets: Vec<u64> = track.samples().iter().map(|s| s.offset).collect();
    let sizes: Vec<u32> = track.samples().iter().map(|s| s.size).collect();
    assert_eq!(offsets, [1000, 1200, 5000]);
    assert_eq!(sizes, [200, 200, 200]);

    let dts: Vec<u64> = track.samples().iter().map(|s| s.dts).collect();
    assert_eq!(dts, [0, 100, 200]);
    let sync: Vec<bool> = track.samples().iter().map(|s| s.is_sync).collect();
    assert_eq!(sync, [true, false, false]);
}

#[test]
fn per_sample_sizes_accumulate_within_chunk() {
    // Three samples in one chunk with distinct sizes; offsets sum the
    // preceding sizes.
    let mut stsz_body = u32s(&[0, 3]);
    stsz_body.extend_from_slice(&u32s(&[100, 250, 50]));

    let mut out = Vec::new();
    let minf = boxb(
        b"minf",
        &boxb(b"stbl", &{
            let mut v = Vec::new();
            let stts = {
                let mut b = u32s(&[1]);
                b.extend_from_slice(&u32s(&[3, 10]));
                b
            };
            v.extend_from_slice(&boxb(b"stts", &full(0, 0, &stts)));
            let stsc = {
                let mut b = u32s(&[1]);
                b.extend_from_slice(&u32s(&[1, 3, 1]));
                b
            };
            v.extend_from_slice(&boxb(b"stsc", &full(0, 0, &stsc)));
            v.extend_from_slice(&boxb(b"stsz", &full(0, 0, &stsz_body)));
            let stco = {
                let mut b = u32s(&[1]);
                b.extend_from_slice(&u32s(&[600]));
                b
            };
            v.extend_from_slice(&boxb(b"stco", &full(0, 0, &stco)));
            v
        }),
    );
    let mut mdia = mdhd(90000, 0);
    mdia.extend_from_slice(&hdlr(b"soun"));
    mdia.extend_from_slice(&minf);
    let mut trak = tkhd(7);
    trak.extend_from_slice(&boxb(b"mdia", &mdia));
    out.extend_from_slice(&boxb(b"moov", &boxb(b"trak", &trak)));
    let pad = 600 - 8 - out.len();
    out.extend_from_slice(&boxb(b"free", &vec![0u8; pad - 8]));
    out.extend_from_slice(&boxb(b"mdat", &vec![0xABu8; 400]));

    let mut file = Mp4File::parse_slice(out).unwrap();
    let tracks = file.tracks().unwrap();
    let track = &tracks[0];
    assert_eq!(track.track_id, 7);

    let offsets: Vec<u64> = track.samples().iter().map(|s| s.offset).collect();
    assert_eq!(offsets, [600, 700, 950]);
    let sizes: Vec<u32> = track.samples().iter().map(|s| s.size).collect();
    assert_eq!(sizes, [100, 250, 50]);
    // No stss table: every sample is a sync sample.
    assert!(track.samples().iter().all(|s| s.is_sync));
}

#[test]
fn sample_bytes_come_from_the_backing_store() {
    let spec = ClassicalSpec {
        stsc: &[(1, 2), (2, 1)],
        chunk_offsets: &[1000, 5000],
        uniform_size: 200,
        sample_count: 3,
        stts: &[(3, 100)],
        stss: None,
    };
    let data = classical_file(&spec, 1000, 4600);

    let mut file = Mp4File::parse_slice(data).unwrap();
    let tracks = file.tracks().unwrap();
    let track = &tracks[0];

    let bytes = track.read_sample_bytes(2).unwrap();
    assert_eq!(bytes.len(), 200);
    for (i, b) in bytes.iter().enumerate() {
        assert_eq!(*b, ((5000 + i as u64) % 251) as u8);
    }
    assert_eq!(track.sample_offset_and_size(2), Some((5000, 200)));
}

#[test]
fn sample_outside_any_region_is_rejected() {
    // Chunk offset points before the mdat payload; retrieval must fail with
    // the named boundary error, not a truncated read.
    let spec = ClassicalSpec {
        stsc: &[(1, 1)],
        chunk_offsets: &[700],
        uniform_size: 100,
        sample_count: 1,
        stts: &[(1, 1)],
        stss: None,
    };
    let data = classical_file(&spec, 1000, 500);

    let mut file = Mp4File::parse_slice(data).unwrap();
    let tracks = file.tracks().unwrap();
    let err = tracks[0].read_sample_bytes(0).unwrap_err();
    assert!(matches!(
        err,
        Error::SampleOutsideMediaData {
            index: 0,
            offset: 700,
            size: 100
        }
    ));
}

#[test]
fn sample_straddling_region_end_is_rejected() {
    // The sample begins inside the mdat but runs past its end.
    let spec = ClassicalSpec {
        stsc: &[(1, 1)],
        chunk_offsets: &[1400],
        uniform_size: 200,
        sample_count: 1,
        stts: &[(1, 1)],
        stss: None,
    };
    let data = classical_file(&spec, 1000, 500);

    let mut file = Mp4File::parse_slice(data).unwrap();
    let tracks = file.tracks().unwrap();
    let err = tracks[0].read_sample_bytes(0).unwrap_err();
    assert!(matches!(err, Error::SampleOutsideMediaData { .. }));
}

#[test]
fn classical_file_roundtrips_bytewise() {
    let spec = ClassicalSpec {
        stsc: &[(1, 2), (2, 1)],
        chunk_offsets: &[1000, 5000],
        uniform_size: 200,
        sample_count: 3,
        stts: &[(3, 100)],
        stss: Some(&[1]),
    };
    let data = classical_file(&spec, 1000, 4600);

    let mut file = Mp4File::parse_slice(data.clone()).unwrap();
    // Resolving tracks interprets the sample tables; the tree must still
    // write back byte-exactly.
    let _ = file.tracks().unwrap();
    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}
