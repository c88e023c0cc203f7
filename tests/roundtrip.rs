use mp4tree::{Error, FourCC, Mp4File, Payload};

fn boxb(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + payload.len());
    v.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    v.extend_from_slice(typ);
    v.extend_from_slice(payload);
    v
}

fn full_payload(version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + body.len());
    v.push(version);
    v.extend_from_slice(&flags.to_be_bytes()[1..]);
    v.extend_from_slice(body);
    v
}

fn roundtrip(data: &[u8]) -> Vec<u8> {
    let file = Mp4File::parse_slice(data.to_vec()).expect("parse");
    let mut out = Vec::new();
    file.write_to(&mut out).expect("write");
    out
}

#[test]
fn minimal_file_roundtrips() {
    let mut data = Vec::new();
    let mut ftyp = Vec::new();
    ftyp.extend_from_slice(b"isom");
    ftyp.extend_from_slice(&512u32.to_be_bytes());
    ftyp.extend_from_slice(b"isom");
    data.extend_from_slice(&boxb(b"ftyp", &ftyp));
    data.extend_from_slice(&boxb(b"free", &[0u8; 12]));

    assert_eq!(roundtrip(&data), data);
}

#[test]
fn unknown_box_is_kept_verbatim() {
    let data = boxb(b"zzyx", &[1, 2, 3, 4, 5]);
    let file = Mp4File::parse_slice(data.clone()).unwrap();
    assert!(matches!(file.boxes[0].payload, Payload::Raw(_)));
    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn interpreted_tree_still_roundtrips() {
    // stts with two entries plus four trailing junk bytes inside the
    // declared size; interpretation must keep them as dead bytes.
    let mut body = Vec::new();
    body.extend_from_slice(&2u32.to_be_bytes());
    for (count, delta) in [(10u32, 100u32), (1, 50)] {
        body.extend_from_slice(&count.to_be_bytes());
        body.extend_from_slice(&delta.to_be_bytes());
    }
    body.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
    let data = boxb(b"stts", &full_payload(0, 0, &body));

    let mut file = Mp4File::parse_slice(data.clone()).unwrap();
    file.interpret_all();
    match &file.boxes[0].payload {
        Payload::Parsed { dead, .. } => assert_eq!(dead, &[0xAA, 0xBB, 0xCC, 0xDD]),
        other => panic!("expected parsed payload, got {:?}", other),
    }

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn uuid_box_roundtrips() {
    let ext: [u8; 16] = *b"0123456789abcdef";
    let mut data = Vec::new();
    data.extend_from_slice(&(8 + 16 + 4u32).to_be_bytes());
    data.extend_from_slice(b"uuid");
    data.extend_from_slice(&ext);
    data.extend_from_slice(&[9, 9, 9, 9]);

    let file = Mp4File::parse_slice(data.clone()).unwrap();
    assert_eq!(file.boxes[0].header.uuid, Some(ext));
    assert_eq!(file.boxes[0].header.header_size, 24);

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn wide_header_form_is_preserved() {
    // A small box gratuitously encoded with the 64-bit size extension must
    // parse to the right size and re-serialize in the same form.
    let mut data = Vec::new();
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(b"blob");
    data.extend_from_slice(&24u64.to_be_bytes());
    data.extend_from_slice(&[7u8; 8]);

    let file = Mp4File::parse_slice(data.clone()).unwrap();
    let hdr = &file.boxes[0].header;
    assert_eq!(hdr.size, 24);
    assert_eq!(hdr.header_size, 16);
    assert!(hdr.wide);

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn size_to_end_resolves_remaining_bytes() {
    let mut data = boxb(b"free", &[0u8; 4]);
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(b"blob");
    data.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

    let file = Mp4File::parse_slice(data.clone()).unwrap();
    let hdr = &file.boxes[1].header;
    assert!(hdr.to_eof);
    assert_eq!(hdr.size, 14);

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn size_to_end_on_stream_is_a_caller_error() {
    let mut data = Vec::new();
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(b"blob");
    data.extend_from_slice(&[1, 2, 3]);

    let err = Mp4File::parse_stream(&data[..]).unwrap_err();
    assert!(matches!(err, Error::UnseekableSource { offset: 0 }));
}

#[test]
fn truncated_header_is_unexpected_eof() {
    let mut data = boxb(b"free", &[0u8; 4]);
    data.extend_from_slice(&[0, 0, 0]); // three bytes of a next header

    let err = Mp4File::parse_slice(data).unwrap_err();
    assert!(matches!(err, Error::UnexpectedEof { .. }));
}

#[test]
fn implausible_top_level_size_stops_gracefully() {
    let mut data = boxb(b"free", &[0u8; 4]);
    data.extend_from_slice(&3u32.to_be_bytes());
    data.extend_from_slice(b"junk");

    let file = Mp4File::parse_slice(data).unwrap();
    assert_eq!(file.boxes.len(), 1);
    assert_eq!(file.boxes[0].header.typ, FourCC(*b"free"));
}

#[test]
fn container_remainder_becomes_dead_bytes() {
    // moov holding one free box plus five trailing bytes: too small for a
    // header, kept verbatim, still byte-exact on the way out.
    let mut moov_payload = boxb(b"free", &[0u8; 4]);
    moov_payload.extend_from_slice(&[1, 2, 3, 4, 5]);
    let data = boxb(b"moov", &moov_payload);

    let file = Mp4File::parse_slice(data.clone()).unwrap();
    match &file.boxes[0].payload {
        Payload::Children { children, dead, .. } => {
            assert_eq!(children.len(), 1);
            assert_eq!(dead, &[1, 2, 3, 4, 5]);
        }
        other => panic!("expected container, got {:?}", other),
    }

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn implausible_child_size_keeps_remainder() {
    let mut moov_payload = boxb(b"free", &[0u8; 4]);
    let mut junk = Vec::new();
    junk.extend_from_slice(&2u32.to_be_bytes());
    junk.extend_from_slice(b"bad!");
    junk.extend_from_slice(&[0xEE; 4]);
    moov_payload.extend_from_slice(&junk);
    let data = boxb(b"moov", &moov_payload);

    let file = Mp4File::parse_slice(data.clone()).unwrap();
    match &file.boxes[0].payload {
        Payload::Children { children, dead, .. } => {
            assert_eq!(children.len(), 1);
            assert_eq!(dead, &junk);
        }
        other => panic!("expected container, got {:?}", other),
    }

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn nested_containers_roundtrip() {
    let stbl = boxb(b"stbl", &boxb(b"stco", &full_payload(0, 0, &0u32.to_be_bytes())));
    let minf = boxb(b"minf", &stbl);
    let mdia = boxb(b"mdia", &minf);
    let trak = boxb(b"trak", &mdia);
    let data = boxb(b"moov", &trak);

    let file = Mp4File::parse_slice(data.clone()).unwrap();
    let stco = file.find("moov.trak.mdia.minf.stbl.stco").expect("path");
    assert_eq!(stco.header.typ, FourCC(*b"stco"));

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn oversized_box_switches_to_wide_header() {
    use mp4tree::{BoxHeader, BoxNode, MediaRegion};

    let region = MediaRegion {
        start: 16,
        len: u32::MAX as u64 + 100,
        header_start: 0,
        header_bytes: Vec::new(),
        data: None,
    };
    let mut node = BoxNode {
        header: BoxHeader::synthesized(FourCC(*b"mdat"), None),
        parent_type: None,
        payload: Payload::Media(region),
    };
    node.update_size();

    assert!(node.header.wide);
    assert_eq!(node.header.header_size, 16);
    assert_eq!(node.header.size, 16 + u32::MAX as u64 + 100);
}

#[test]
fn meta_prelude_is_preserved() {
    // meta is a full-box container: four version/flags bytes precede its
    // first child.
    let mut payload = vec![0, 0, 0, 0];
    payload.extend_from_slice(&boxb(b"free", &[0u8; 2]));
    let data = boxb(b"meta", &payload);

    let file = Mp4File::parse_slice(data.clone()).unwrap();
    match &file.boxes[0].payload {
        Payload::Children {
            prelude, children, ..
        } => {
            assert_eq!(prelude, &[0, 0, 0, 0]);
            assert_eq!(children.len(), 1);
        }
        other => panic!("expected container, got {:?}", other),
    }

    let mut out = Vec::new();
    file.write_to(&mut out).unwrap();
    assert_eq!(out, data);
}
