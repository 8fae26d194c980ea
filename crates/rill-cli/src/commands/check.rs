//! Patch compile check and schedule summary.

use clap::Args;
use rill_config::paths::patch_name_from_path;
use rill_core::Phase;

use super::common::{compile, load_patch};

#[derive(Args)]
pub struct CheckArgs {
    /// Patch name or path to a TOML patch file
    #[arg(value_name = "PATCH")]
    patch: String,

    /// Print every scheduled step
    #[arg(long)]
    steps: bool,
}

pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let (path, patch) = load_patch(&args.patch)?;
    let program = compile(&patch)?;

    let name = patch
        .name
        .clone()
        .or_else(|| patch_name_from_path(&path))
        .unwrap_or_else(|| args.patch.clone());

    println!("{}: ok", name);
    println!();
    println!("  Blocks:   {}", program.blocks().len());
    println!("  Ops:      {}", program.ops().len());
    println!("  Latches:  {}", program.latches().len());
    println!(
        "  Buses:    {}",
        program.buses().iter().filter(|b| b.rail.is_none()).count()
    );
    println!("  Inputs:   {}", program.inputs().len());
    println!("  Outputs:  {}", program.outputs().len());
    println!();
    println!("Schedule ({} steps):", program.schedule().len());
    for phase in Phase::ALL {
        println!("  {:14} {}", phase.name(), program.schedule().phase(phase).len());
    }

    if args.steps {
        println!();
        for (i, step) in program.schedule().steps().iter().enumerate() {
            println!("  {:4}  {}", i, step);
        }
    }

    if !program.warnings().is_empty() {
        println!();
        println!("{} warning(s)", program.warnings().len());
    }

    tracing::debug!(path = %path.display(), "patch checked");
    Ok(())
}
