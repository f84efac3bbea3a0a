//! Command-line front end for `cpuscan`.
//!
//! Scans the live system (default) or replays a dump file, then prints a
//! topology report, re-emits the data in any dump format, prints a single
//! leaf, or evaluates a flag selector.
//!
//! # Usage
//!
//! ```text
//! cpuscan [--file <PATH> [--format <NAME>]] [--out-format <NAME>]
//!         [--cpu <ID>] [--leaf <LEAF>] [--flag <SPEC>]
//!         [--topology] [--no-topology]
//!         [--brute-force] [--no-vendor-check] [--no-feature-check]
//! ```
//!
//! ## Examples
//!
//! ```text
//! # Scan the live system and print the topology report.
//! cpuscan
//!
//! # Re-emit a vendor tool report as a compact native dump.
//! cpuscan --file report.txt --format aida --out-format native
//!
//! # Query one flag on one processor.
//! cpuscan --cpu 0 --flag 0x7:ebx.avx2
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use cpuscan::{DumpFormat, EnumerationOptions, ProcessorSnapshot};

/// Scan the CPUID instruction across all processors, or replay a dump file.
#[derive(FromArgs)]
struct Args {
    /// replay this dump file instead of scanning the live system
    #[argh(option)]
    file: Option<PathBuf>,

    /// format of the dump file: native, percpu, table or aida
    #[argh(option, default = "String::from(\"native\")")]
    format: String,

    /// re-emit the results as a dump in this format instead of a report
    #[argh(option)]
    out_format: Option<String>,

    /// restrict single-leaf and flag queries to this processor
    #[argh(option)]
    cpu: Option<u32>,

    /// print the recorded subleaves of one leaf (hexadecimal, e.g. 0x4)
    #[argh(option)]
    leaf: Option<String>,

    /// evaluate a flag selector, e.g. 0x7:ebx.avx2 or 0x1:ecx[31]
    #[argh(option)]
    flag: Option<String>,

    /// print only the topology report, without the per-processor identity
    /// lines
    #[argh(switch)]
    topology: bool,

    /// skip the topology report
    #[argh(switch)]
    no_topology: bool,

    /// probe every leaf heuristically instead of using the built-in
    /// descriptors
    #[argh(switch)]
    brute_force: bool,

    /// query vendor-specific leaves on every vendor
    #[argh(switch)]
    no_vendor_check: bool,

    /// query leaves even when their prerequisite feature bit is clear
    #[argh(switch)]
    no_feature_check: bool,
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let snapshots = gather(args)?;

    if let Some(name) = &args.out_format {
        let format = DumpFormat::from_name(name)?;
        print!("{}", cpuscan::print_dump(&snapshots, format));
        return Ok(());
    }

    let selected = match args.cpu {
        Some(id) => std::slice::from_ref(cpuscan::select_processor(&snapshots, id)?),
        None => &snapshots[..],
    };

    if let Some(flag) = &args.flag {
        let spec = leafspec::parse(flag)?;

        for snapshot in selected {
            println!(
                "cpu {}: {} = {}",
                snapshot.id,
                spec,
                cpuscan::flag_query::evaluate(&spec, &snapshot.store)
            );
        }

        return Ok(());
    }

    if let Some(leaf) = &args.leaf {
        let leaf = parse_leaf(leaf)?;

        for snapshot in selected {
            println!("cpu {}:", snapshot.id);

            let subleaves = snapshot.store.subleaves_sorted(leaf);

            if subleaves.is_empty() {
                println!("  leaf 0x{leaf:x}: no data");
                continue;
            }

            for (subleaf, registers) in subleaves {
                println!("  0x{leaf:08x}.0x{subleaf:02x}: {registers}");
            }
        }

        return Ok(());
    }

    if !args.topology {
        for snapshot in selected {
            println!("cpu {}: {}", snapshot.id, snapshot.identity);
        }
    }

    if args.topology || !args.no_topology {
        print!("{}", cpuscan::build_topology(selected));
    }

    Ok(())
}

fn gather(args: &Args) -> Result<Vec<ProcessorSnapshot>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.file {
        let format = DumpFormat::from_name(&args.format)?;
        let text = std::fs::read_to_string(path)?;

        let outcome = cpuscan::enumerate_file(&text, format)?;

        for skipped in &outcome.skipped {
            eprintln!(
                "{}:{}: skipped unparseable line: {}",
                path.display(),
                skipped.line_number,
                skipped.content
            );
        }

        return Ok(outcome.snapshots);
    }

    let options = EnumerationOptions {
        brute_force: args.brute_force,
        skip_vendor_check: args.no_vendor_check,
        skip_feature_check: args.no_feature_check,
    };

    Ok(cpuscan::enumerate_processors(options)?)
}

fn parse_leaf(text: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let value = match text.strip_prefix("0x") {
        Some(digits) => u32::from_str_radix(digits, 16)?,
        None => text.parse()?,
    };

    Ok(value)
}
