use clap::{ArgAction, Parser};
use mp4tree::{util::hex_dump, Mp4File, Track};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(version, about = "Resolve and print per-track sample tables")]
struct Args {
    /// MP4/ISOBMFF file path
    path: String,

    /// Only this track id
    #[arg(long)]
    track: Option<u32>,

    /// Print at most this many samples per track (0 = all)
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Fetch this sample's bytes and hex-dump them
    #[arg(long)]
    read: Option<u32>,

    /// Emit JSON instead of tabular output
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Serialize)]
struct JsonTrack<'a> {
    track_id: u32,
    handler_type: Option<String>,
    timescale: u32,
    duration: u64,
    language: Option<&'a str>,
    sample_count: u32,
    samples: &'a [mp4tree::SampleInfo],
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut file = Mp4File::open(&args.path)?;
    let tracks = file.tracks()?;
    let selected: Vec<&Track> = tracks
        .iter()
        .filter(|t| args.track.map_or(true, |id| t.track_id == id))
        .collect();

    if args.json {
        let out: Vec<JsonTrack> = selected
            .iter()
            .map(|t| JsonTrack {
                track_id: t.track_id,
                handler_type: t.handler_type.map(|h| h.to_string()),
                timescale: t.timescale,
                duration: t.duration,
                language: t.language.as_deref(),
                sample_count: t.sample_count(),
                samples: t.samples(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for track in &selected {
        println!(
            "track {} handler={} timescale={} duration={} samples={}",
            track.track_id,
            track
                .handler_type
                .map(|h| h.to_string())
                .unwrap_or_else(|| "?".into()),
            track.timescale,
            track.duration,
            track.sample_count()
        );

        let shown = if args.limit == 0 {
            track.samples().len()
        } else {
            args.limit.min(track.samples().len())
        };
        println!("  {:>6} {:>12} {:>8} {:>10} {:>11} {:>6} sync", "index", "offset", "size", "dts", "pts", "dur");
        for s in &track.samples()[..shown] {
            println!(
                "  {:>6} {:>12} {:>8} {:>10} {:>11} {:>6} {}",
                s.index,
                s.offset,
                s.size,
                s.dts,
                s.pts,
                s.duration,
                if s.is_sync { "*" } else { " " }
            );
        }
        if shown < track.samples().len() {
            println!("  ... {} more", track.samples().len() - shown);
        }

        if let Some(index) = args.read {
            let bytes = track.read_sample_bytes(index)?;
            let (offset, _) = track.sample_offset_and_size(index).unwrap_or((0, 0));
            println!("sample {} ({} bytes):", index, bytes.len());
            print!("{}", hex_dump(&bytes[..bytes.len().min(256)], offset));
        }
    }

    Ok(())
}
