//! Offline export of a fixed-step run.

use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use rill_config::SnapshotFile;
use rill_core::OfflineExport;

use super::common::{compile, frame_deltas, load_patch, parse_inputs, parse_key_val};

#[derive(Args)]
pub struct ExportArgs {
    /// Patch name or path to a TOML patch file
    #[arg(value_name = "PATCH")]
    patch: String,

    /// Number of frames to export
    #[arg(short, long, default_value = "300")]
    frames: usize,

    /// Frame delta in milliseconds
    #[arg(long, default_value = "16.67")]
    dt: f64,

    /// Host input value (name=value), held for every frame
    #[arg(short, long, value_parser = parse_key_val)]
    input: Vec<(String, String)>,

    /// Start from a saved state snapshot
    #[arg(long, value_name = "SNAPSHOT")]
    resume: Option<PathBuf>,

    /// Output JSON file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Also save the final state snapshot to this file
    #[arg(long, value_name = "SNAPSHOT")]
    save_state: Option<PathBuf>,
}

pub fn run(args: ExportArgs) -> anyhow::Result<()> {
    let (_, patch) = load_patch(&args.patch)?;
    let program = compile(&patch)?;
    let inputs = parse_inputs(&program, &args.input)?;
    let deltas = frame_deltas(args.frames, args.dt)?;

    let mut export = OfflineExport::new(program);
    if let Some(snapshot) = &args.resume {
        export = export.with_state(SnapshotFile::load(snapshot)?.state);
    }
    for (name, value) in inputs {
        export = export.with_input(name, value);
    }

    let pb = ProgressBar::new(deltas.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    let mut event_count = 0usize;
    let result = export.run(&deltas, |frame| {
        event_count += frame.events.len();
        pb.inc(1);
    })?;
    pb.finish_and_clear();

    if event_count > 0 {
        tracing::warn!(events = event_count, "diagnostic events raised during export");
    }

    let json = serde_json::to_string_pretty(&result)?;
    match &args.out {
        Some(out) => {
            std::fs::write(out, json)?;
            eprintln!("Exported {} frames to {}", result.frames.len(), out.display());
        }
        None => println!("{json}"),
    }

    if let Some(path) = &args.save_state {
        SnapshotFile::new(result.final_state).save(path)?;
    }

    Ok(())
}
