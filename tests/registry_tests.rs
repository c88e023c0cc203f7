use mp4tree::kinds::{RawFields, Stts};
use mp4tree::{BoxFields, BoxKey, FourCC, KindEntry, Mp4File, NodeClass, Payload, Registry};

fn boxb(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + payload.len());
    v.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    v.extend_from_slice(typ);
    v.extend_from_slice(payload);
    v
}

fn stts_payload() -> Vec<u8> {
    let mut v = vec![0, 0, 0, 0];
    v.extend_from_slice(&1u32.to_be_bytes());
    v.extend_from_slice(&3u32.to_be_bytes());
    v.extend_from_slice(&100u32.to_be_bytes());
    v
}

#[test]
fn builtin_resolves_by_type() {
    let reg = Registry::builtin();
    let key = BoxKey::FourCC(FourCC(*b"moov"));
    assert_eq!(
        reg.resolve(None, &key).class,
        NodeClass::Container { prelude: 0 }
    );
    assert_eq!(reg.name_of(None, &key), "Movie Box");
}

#[test]
fn unknown_type_falls_back_to_raw() {
    let reg = Registry::builtin();
    let key = BoxKey::FourCC(FourCC(*b"zzyx"));
    assert_eq!(reg.resolve(None, &key).class, NodeClass::Leaf);
    assert_eq!(reg.name_of(None, &key), "unknown");
}

#[test]
fn parent_scoped_entry_wins_over_type_entry() {
    let reg = Registry::builtin().with_scoped_entry(
        BoxKey::FourCC(FourCC(*b"udta")),
        BoxKey::FourCC(FourCC(*b"stts")),
        KindEntry {
            name: "opaque timing",
            class: NodeClass::Leaf,
            interpret: None,
        },
    );

    let stts = BoxKey::FourCC(FourCC(*b"stts"));
    let udta = BoxKey::FourCC(FourCC(*b"udta"));
    assert_eq!(reg.name_of(Some(&udta), &stts), "opaque timing");
    assert_eq!(reg.name_of(None, &stts), "Decoding Time to Sample Box");
}

#[test]
fn uuid_entry_and_fallback() {
    let ext: [u8; 16] = *b"fedcba9876543210";
    let reg = Registry::builtin().with_entry(
        BoxKey::Uuid(ext),
        KindEntry {
            name: "vendor blob",
            class: NodeClass::Leaf,
            interpret: None,
        },
    );

    assert_eq!(reg.name_of(None, &BoxKey::Uuid(ext)), "vendor blob");
    // Any other extended type lands on the generic uuid entry.
    assert_eq!(
        reg.name_of(None, &BoxKey::Uuid([0u8; 16])),
        "User Extension Box"
    );
}

#[test]
fn mapping_file_overrides_builtin() {
    let mut reg = Registry::builtin();
    reg.apply_mapping(
        r#"{ "entries": [
            { "type": "stts", "kind": "raw" },
            { "type": "grp ", "kind": "container" },
            { "type": "crtt", "parent": "udta", "kind": "raw" }
        ] }"#,
    )
    .unwrap();

    let stts = BoxKey::FourCC(FourCC(*b"stts"));
    assert!(reg.resolve(None, &stts).interpret.is_none());
    assert_eq!(
        reg.resolve(None, &BoxKey::FourCC(FourCC(*b"grp "))).class,
        NodeClass::Container { prelude: 0 }
    );

    // The mapped container drives the parser: children appear in the tree.
    let data = boxb(b"grp ", &boxb(b"free", &[0u8; 4]));
    let file = Mp4File::parse_slice_with(data, reg).unwrap();
    assert!(matches!(
        file.boxes[0].payload,
        Payload::Children { .. }
    ));
}

#[test]
fn mapped_raw_kind_disables_interpretation() {
    let mut reg = Registry::builtin();
    reg.apply_mapping(r#"{ "entries": [ { "type": "stts", "kind": "raw" } ] }"#)
        .unwrap();

    let data = boxb(b"stts", &stts_payload());
    let mut file = Mp4File::parse_slice_with(data, reg).unwrap();
    file.interpret_all();

    // The node interpreted under the mapped registry is a raw payload, so a
    // typed downcast to Stts finds nothing.
    match &file.boxes[0].payload {
        Payload::Parsed { fields, .. } => {
            assert!(fields.as_any().downcast_ref::<RawFields>().is_some());
            assert!(fields.as_any().downcast_ref::<Stts>().is_none());
        }
        other => panic!("expected parsed payload, got {:?}", other),
    }
}

#[test]
fn mapping_rejects_unknown_kind() {
    let mut reg = Registry::builtin();
    let err = reg
        .apply_mapping(r#"{ "entries": [ { "type": "stts", "kind": "nope" } ] }"#)
        .unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[test]
fn mapping_rejects_entry_without_identity() {
    let mut reg = Registry::builtin();
    assert!(reg
        .apply_mapping(r#"{ "entries": [ { "kind": "raw" } ] }"#)
        .is_err());
}

#[test]
fn mapping_accepts_uuid_identity() {
    let mut reg = Registry::builtin();
    reg.apply_mapping(
        r#"{ "entries": [
            { "uuid": "66656463626139383736353433323130", "kind": "media" }
        ] }"#,
    )
    .unwrap();
    let ext: [u8; 16] = *b"fedcba9876543210";
    assert_eq!(reg.resolve(None, &BoxKey::Uuid(ext)).class, NodeClass::Media);
}

#[test]
fn lazy_interpretation_happens_once_on_access() {
    let data = boxb(b"stts", &stts_payload());
    let mut file = Mp4File::parse_slice(data).unwrap();
    assert!(matches!(file.boxes[0].payload, Payload::Raw(_)));

    let registry = Registry::builtin();
    let node = &mut file.boxes[0];
    let stts = node.fields::<Stts>(&registry).unwrap().expect("typed");
    assert_eq!(stts.entries.len(), 1);
    assert_eq!(stts.entries[0].sample_delta, 100);
    assert!(matches!(node.payload, Payload::Parsed { .. }));
}
