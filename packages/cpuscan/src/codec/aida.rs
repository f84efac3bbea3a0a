//! The report format of a well-known vendor diagnostics tool.
//!
//! Processor sections open with a decorated marker line; each result is a
//! `CPUID` line with dash-separated register values and an optional subleaf
//! annotation:
//!
//! ```text
//! ------[ Logical CPU #0 ]------
//! CPUID 00000000: 0000000B-756E6547-6C65746E-49656E69
//! CPUID 0000000B: 00000001-00000002-00000100-00000000 [SL 00]
//! CPUID 0000000B: 00000004-00000004-00000201-00000000 [SL 01]
//! ```
//!
//! Reports of this tool carry plenty of prose around the CPUID lines; lines
//! that do not start with `CPUID` are not data and are skipped silently.
//! Lines that do start with `CPUID` but fail to parse are reported.

use std::fmt::Write;

use super::{parse_hex, DecodeOutcome, DumpBuilder};
use crate::scan::ProcessorSnapshot;
use crate::Registers;

pub(crate) fn decode(text: &str) -> DecodeOutcome {
    let mut builder = DumpBuilder::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();

        if let Some(marker) = parse_section_marker(line) {
            builder.start_processor(marker);
            continue;
        }

        let Some(rest) = line.strip_prefix("CPUID ") else {
            continue;
        };

        if let Some((leaf, subleaf, registers)) = parse_cpuid_line(rest) {
            builder.insert(leaf, subleaf, registers);
        } else {
            builder.skip(index + 1, raw_line);
        }
    }

    builder.finish()
}

/// `------[ Logical CPU #N ]------`
fn parse_section_marker(line: &str) -> Option<Option<u32>> {
    if !line.starts_with('-') {
        return None;
    }

    let inner = line
        .trim_matches('-')
        .trim()
        .strip_prefix('[')?
        .strip_suffix(']')?
        .trim();

    let label = inner.strip_prefix("Logical CPU")?.trim();
    let number = label.strip_prefix('#')?.trim();

    Some(number.parse().ok())
}

/// `LEAF: EAX-EBX-ECX-EDX` optionally followed by `[SL xx]`.
fn parse_cpuid_line(rest: &str) -> Option<(u32, u32, Registers)> {
    let (selector, values) = rest.split_once(':')?;
    let leaf = parse_hex(selector.trim())?;

    let values = values.trim();
    let (values, subleaf) = match values.split_once('[') {
        Some((values, annotation)) => {
            let subleaf = parse_hex(
                annotation
                    .strip_suffix(']')?
                    .trim()
                    .strip_prefix("SL")?
                    .trim(),
            )?;
            (values.trim(), subleaf)
        }
        None => (values, 0),
    };

    let mut fields = values.split('-');
    let eax = parse_hex(fields.next()?.trim())?;
    let ebx = parse_hex(fields.next()?.trim())?;
    let ecx = parse_hex(fields.next()?.trim())?;
    let edx = parse_hex(fields.next()?.trim())?;
    if fields.next().is_some() {
        return None;
    }

    Some((leaf, subleaf, Registers::new(eax, ebx, ecx, edx)))
}

pub(crate) fn encode(snapshots: &[ProcessorSnapshot]) -> String {
    let mut output = String::new();

    for snapshot in snapshots {
        writeln!(output, "------[ Logical CPU #{} ]------", snapshot.id)
            .expect("writing to a String cannot fail");

        for (leaf, subleaf, registers) in snapshot.store.iter_sorted() {
            write!(
                output,
                "CPUID {leaf:08X}: {:08X}-{:08X}-{:08X}-{:08X}",
                registers.eax, registers.ebx, registers.ecx, registers.edx
            )
            .expect("writing to a String cannot fail");

            // Subleaf 0 is implicit; the annotation only appears past it.
            if subleaf > 0 {
                write!(output, " [SL {subleaf:02X}]").expect("writing to a String cannot fail");
            }

            writeln!(output).expect("writing to a String cannot fail");
        }
    }

    output
}
