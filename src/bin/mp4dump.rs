use clap::{ArgAction, Parser};
use mp4tree::{boxes::Payload, util::hex_dump, BoxNode, Mp4File};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(version, about = "ISO-BMFF box-tree explorer")]
struct Args {
    /// MP4/ISOBMFF file path
    path: String,

    /// Only print the subtree at a dotted path (e.g. moov.trak.mdia)
    #[arg(long)]
    filter: Option<String>,

    /// Interpret known payloads and print their fields
    #[arg(long, action = ArgAction::SetTrue)]
    decode: bool,

    /// Hex-dump the raw payload of every box with this four-character code
    #[arg(long)]
    raw: Option<String>,

    /// Cap hex-dumped payload bytes (0 = whole payload)
    #[arg(long, default_value_t = 256)]
    bytes: usize,

    /// Limit tree recursion depth
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Emit JSON instead of the human-readable tree
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Merge extra registry mappings from a JSON file
    #[arg(long)]
    mapping: Option<String>,
}

#[derive(Serialize)]
struct JsonBox {
    offset: u64,
    size: u64,
    header_size: u64,
    typ: String,
    uuid: Option<String>,
    name: String,
    kind: &'static str,
    decoded: Option<String>,
    dead_bytes: u64,
    children: Option<Vec<JsonBox>>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut file = Mp4File::open(&args.path)?;
    if let Some(mapping_path) = &args.mapping {
        let mapping = std::fs::read_to_string(mapping_path)?;
        file.registry_mut().apply_mapping(&mapping)?;
    }
    if args.decode {
        file.interpret_all();
    }

    let roots: Vec<&BoxNode> = match &args.filter {
        Some(path) => file.find(path).into_iter().collect(),
        None => file.boxes.iter().collect(),
    };

    if args.json {
        let tree: Vec<JsonBox> = roots.iter().map(|b| build_json(&file, b)).collect();
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    for root in &roots {
        print_tree(&file, root, 0, args.max_depth);
    }

    if let Some(raw) = &args.raw {
        dump_raw(&file, raw, args.bytes);
    }

    Ok(())
}

fn kind_str(node: &BoxNode) -> &'static str {
    match &node.payload {
        Payload::Raw(_) => "raw",
        Payload::Parsed { .. } => "parsed",
        Payload::Children { .. } => "container",
        Payload::Media(_) => "media",
    }
}

fn decoded_str(node: &BoxNode) -> Option<String> {
    match &node.payload {
        Payload::Parsed { fields, .. } => Some(format!("{:?}", fields)),
        _ => None,
    }
}

fn dead_len(node: &BoxNode) -> u64 {
    match &node.payload {
        Payload::Parsed { dead, .. } => dead.len() as u64,
        Payload::Children { dead, .. } => dead.len() as u64,
        _ => 0,
    }
}

fn print_tree(file: &Mp4File, node: &BoxNode, depth: usize, max_depth: usize) {
    if depth > max_depth {
        return;
    }
    let name = file
        .registry()
        .name_of(node.parent_type.as_ref(), &node.header.key());
    let indent = "  ".repeat(depth);
    print!(
        "{}{} @{} size={} [{}] {}",
        indent,
        node.header.typ,
        node.header.start,
        node.header.size,
        kind_str(node),
        name
    );
    if let Some(uuid) = node.header.uuid {
        print!(" uuid={}", hex::encode(uuid));
    }
    if let Some(decoded) = decoded_str(node) {
        print!(" {}", decoded);
    }
    let dead = dead_len(node);
    if dead > 0 {
        print!(" (+{} dead bytes)", dead);
    }
    println!();

    if let Some(children) = node.children() {
        for child in children {
            print_tree(file, child, depth + 1, max_depth);
        }
    }
}

fn build_json(file: &Mp4File, node: &BoxNode) -> JsonBox {
    JsonBox {
        offset: node.header.start,
        size: node.header.size,
        header_size: node.header.header_size,
        typ: node.header.typ.to_string(),
        uuid: node.header.uuid.map(hex::encode),
        name: file
            .registry()
            .name_of(node.parent_type.as_ref(), &node.header.key())
            .to_string(),
        kind: kind_str(node),
        decoded: decoded_str(node),
        dead_bytes: dead_len(node),
        children: node
            .children()
            .map(|kids| kids.iter().map(|c| build_json(file, c)).collect()),
    }
}

fn dump_raw(file: &Mp4File, typ: &str, cap: usize) {
    fn walk(node: &BoxNode, typ: &str, cap: usize) {
        if node.header.typ.to_string() == typ {
            if let Payload::Raw(bytes) = &node.payload {
                let shown = if cap == 0 { bytes.len() } else { cap.min(bytes.len()) };
                let payload_start = node.header.start + node.header.header_size;
                println!("{} @{} ({} bytes):", typ, payload_start, bytes.len());
                print!("{}", hex_dump(&bytes[..shown], payload_start));
            }
        }
        if let Some(children) = node.children() {
            for c in children {
                walk(c, typ, cap);
            }
        }
    }
    for b in &file.boxes {
        walk(b, typ, cap);
    }
}
