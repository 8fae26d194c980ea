//! Live frame-by-frame run of a patch.

use std::path::PathBuf;

use clap::Args;
use rill_config::SnapshotFile;
use rill_config::paths::patch_name_from_path;
use rill_core::Runtime;

use super::common::{compile, format_outputs, frame_deltas, load_patch, parse_inputs, parse_key_val};

#[derive(Args)]
pub struct RunArgs {
    /// Patch name or path to a TOML patch file
    #[arg(value_name = "PATCH")]
    patch: String,

    /// Number of frames to run
    #[arg(short, long, default_value = "60")]
    frames: usize,

    /// Frame delta in milliseconds
    #[arg(long, default_value = "16.67")]
    dt: f64,

    /// Host input value (name=value), held for every frame
    #[arg(short, long, value_parser = parse_key_val)]
    input: Vec<(String, String)>,

    /// Print outputs every N frames
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    every: u64,

    /// Resume from a saved state snapshot
    #[arg(long, value_name = "SNAPSHOT")]
    resume: Option<PathBuf>,

    /// Save the final state snapshot to this file
    #[arg(long, value_name = "SNAPSHOT")]
    save_state: Option<PathBuf>,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let (path, patch) = load_patch(&args.patch)?;
    let program = compile(&patch)?;
    let inputs = parse_inputs(&program, &args.input)?;
    let deltas = frame_deltas(args.frames, args.dt)?;

    let mut runtime = match &args.resume {
        Some(snapshot) => {
            let file = SnapshotFile::load(snapshot)?;
            tracing::info!(
                snapshot = %snapshot.display(),
                frame = file.state.clock().frame,
                "resuming"
            );
            Runtime::with_state(program, file.state)
        }
        None => Runtime::new(program),
    };
    runtime.set_inputs(inputs)?;

    for dt in deltas {
        let report = runtime.run_frame(dt)?.clone();
        for event in &report.events {
            tracing::warn!(frame = report.frame, "{}", event);
        }
        if (report.frame + 1) % args.every == 0 {
            println!(
                "{:6} {:10.2}  {}",
                report.frame,
                report.time_ms,
                format_outputs(&runtime.outputs())
            );
        }
    }

    if let Some(out) = &args.save_state {
        let mut file = SnapshotFile::new(runtime.snapshot());
        if let Some(name) = patch.name.clone().or_else(|| patch_name_from_path(&path)) {
            file = file.with_patch(name);
        }
        file.save(out)?;
        tracing::info!(snapshot = %out.display(), "state saved");
    }

    Ok(())
}
