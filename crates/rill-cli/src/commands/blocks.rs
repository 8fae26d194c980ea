//! Block listing and port information command.

#![allow(clippy::print_literal)] // Table headers use literal strings intentionally

use clap::Args;
use rill_blocks::{BlockCategory, BlockRegistry};
use rill_core::{DefaultSource, PortSpec};

#[derive(Args)]
pub struct BlocksArgs {
    /// Show ports for a specific block type
    #[arg(value_name = "TYPE")]
    block: Option<String>,
}

pub fn run(args: BlocksArgs) -> anyhow::Result<()> {
    let registry = BlockRegistry::new();

    if let Some(type_name) = &args.block {
        let spec = registry
            .get(type_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown block type: {}", type_name))?;

        println!("{}", spec.type_name);
        println!("{}", "=".repeat(spec.type_name.len()));
        println!();
        println!("{}", spec.description);
        if let Some(category) = registry.category(type_name) {
            println!("Category: {}", category.name());
        }
        println!();

        print_ports("Inputs", &spec.inputs, true);
        print_ports("Outputs", &spec.outputs, false);
        return Ok(());
    }

    println!("Available blocks ({}):", registry.len());
    for category in BlockCategory::ALL {
        let blocks = registry.blocks_in_category(category);
        if blocks.is_empty() {
            continue;
        }
        println!();
        println!("{} - {}", category.name(), category.description());
        for spec in blocks {
            println!("  {:14}  {}", spec.type_name, spec.description);
        }
    }
    println!();
    println!("Use 'rill blocks <TYPE>' for port details.");

    Ok(())
}

fn print_ports(title: &str, ports: &[PortSpec], inputs: bool) {
    println!("{}:", title);
    if ports.is_empty() {
        println!("  (none)");
        println!();
        return;
    }
    if inputs {
        println!("  {:10}  {:16}  {:10}  {}", "Name", "Type", "Default", "Description");
        println!("  {:10}  {:16}  {:10}  {}", "----", "----", "-------", "-----------");
    } else {
        println!("  {:10}  {:16}  {}", "Name", "Type", "Description");
        println!("  {:10}  {:16}  {}", "----", "----", "-----------");
    }
    for port in ports {
        let ty = port.ty.to_string();
        if inputs {
            println!(
                "  {:10}  {:16}  {:10}  {}",
                port.name,
                ty,
                default_label(&port.default),
                port.description
            );
        } else {
            println!("  {:10}  {:16}  {}", port.name, ty, port.description);
        }
    }
    println!();
}

fn default_label(default: &DefaultSource) -> String {
    match default {
        DefaultSource::Value(value) => value.to_string(),
        DefaultSource::Zero => "0".to_string(),
        DefaultSource::Required => "required".to_string(),
    }
}
