//! Shared CLI helpers used across multiple commands.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rill_blocks::BlockRegistry;
use rill_config::{Patch, load_patch as config_load_patch, resolve_patch, validate_patch};
use rill_core::{CompileReport, Program, Value, compile_patch};

/// Parse a `key=value` string for clap's `value_parser`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!(
            "Invalid input format: '{}' (expected name=value)",
            s
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Load a patch by name or path.
///
/// Searches in this order:
/// 1. File path (if it names an existing file)
/// 2. User patches directory (by name, with or without `.toml`)
pub fn load_patch(name: &str) -> anyhow::Result<(PathBuf, Patch)> {
    let path = resolve_patch(name)?;
    let patch = config_load_patch(&path)?;
    Ok((path, patch))
}

/// Validate and compile a patch against the built-in blocks.
///
/// Diagnostics are printed to stderr; any error fails the command.
pub fn compile(patch: &Patch) -> anyhow::Result<Program> {
    validate_patch(patch)?;
    let report = compile_patch(patch, &BlockRegistry::new());
    print_diagnostics(&report);
    let count = report.errors.len();
    match report.program {
        Some(program) => Ok(program),
        None => anyhow::bail!("patch failed to compile ({count} error(s))"),
    }
}

/// Print compile errors and warnings to stderr.
///
/// Cycle errors list every ranked latch suggestion, best first.
pub fn print_diagnostics(report: &CompileReport) {
    for error in &report.errors {
        eprintln!("error: {error}");
        if let Some(cycle) = error.as_cycle()
            && cycle.suggested_latch_edges.len() > 1
        {
            eprintln!("  latch candidates:");
            for (i, edge) in cycle.suggested_latch_edges.iter().enumerate() {
                eprintln!("    {}. {edge}", i + 1);
            }
        }
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}

/// Convert `name=value` pairs into typed host inputs for `program`.
///
/// Values are read as numbers, or as `true`/`false` for boolean inputs.
pub fn parse_inputs(
    program: &Program,
    pairs: &[(String, String)],
) -> anyhow::Result<BTreeMap<String, Value>> {
    let mut inputs = BTreeMap::new();
    for (name, raw) in pairs {
        let Some(ty) = program.inputs().get(name) else {
            let known: Vec<&str> = program.inputs().keys().map(String::as_str).collect();
            anyhow::bail!(
                "Unknown input '{}'. Patch inputs: {}",
                name,
                if known.is_empty() {
                    "(none)".to_string()
                } else {
                    known.join(", ")
                }
            );
        };
        let x = match raw.as_str() {
            "true" => 1.0,
            "false" => 0.0,
            other => other
                .parse::<f64>()
                .map_err(|_| anyhow::anyhow!("Invalid value for input '{}': '{}'", name, raw))?,
        };
        inputs.insert(name.clone(), Value::from_components(ty.domain, &[x]));
    }
    Ok(inputs)
}

/// Fixed frame deltas for `frames` frames.
pub fn frame_deltas(frames: usize, dt_ms: f64) -> anyhow::Result<Vec<f64>> {
    if !(dt_ms.is_finite() && dt_ms >= 0.0) {
        anyhow::bail!("Frame delta must be a finite, non-negative number of milliseconds");
    }
    Ok(vec![dt_ms; frames])
}

/// Format outputs as `name=value` pairs.
pub fn format_outputs(outputs: &BTreeMap<String, Value>) -> String {
    outputs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("  ")
}
