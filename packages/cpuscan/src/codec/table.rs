//! The fixed-layout key/index table format.
//!
//! Three key families, each indexed from zero:
//!
//! ```text
//! basic_cpuid[0]=00000016 756e6547 6c65746e 49656e69
//! ext_cpuid[0]=80000008 00000000 00000000 00000000
//! cache_cpuid4[0]=1c004121 01c0003f 0000003f 00000000
//! ```
//!
//! `basic_cpuid[i]` is standard leaf `i`, `ext_cpuid[i]` is extended leaf
//! `0x8000_0000 + i`, `cache_cpuid4[i]` is leaf 4 subleaf `i`. The layout is
//! fixed: the encoder zero-pads the basic and extended sections to 32 entries
//! each, and the decoder drops all-zero tuples rather than storing padding.
//! A repeated `basic_cpuid[0]` key signals the next processor; the format
//! carries no processor numbering of its own, so ids are assigned
//! sequentially.

use std::fmt::Write;

use super::{parse_hex, DecodeOutcome, DumpBuilder};
use crate::scan::ProcessorSnapshot;
use crate::{Registers, EXTENDED_BASE};

/// Entries emitted per section regardless of how many leaves carry data.
const SECTION_ENTRIES: u32 = 32;

pub(crate) fn decode(text: &str) -> DecodeOutcome {
    let mut builder = DumpBuilder::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, entry_index, registers)) = parse_line(line) else {
            builder.skip(index + 1, raw_line);
            continue;
        };

        let (leaf, subleaf) = match key {
            Key::Basic => {
                if entry_index == 0 {
                    // The start of each basic section is the processor
                    // boundary; the format has no other one.
                    builder.start_processor(None);
                }
                (entry_index, 0)
            }
            Key::Extended => (EXTENDED_BASE + entry_index, 0),
            Key::Cache4 => (0x4, entry_index),
        };

        // The fixed layout pads with zeroed entries; those are not results.
        if registers.is_all_zero() {
            continue;
        }

        builder.insert(leaf, subleaf, registers);
    }

    builder.finish()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Key {
    Basic,
    Extended,
    Cache4,
}

/// `key[index]=EAX EBX ECX EDX`
fn parse_line(line: &str) -> Option<(Key, u32, Registers)> {
    let (selector, values) = line.split_once('=')?;

    let (name, rest) = selector.split_once('[')?;
    let index_text = rest.strip_suffix(']')?;
    let entry_index: u32 = index_text.parse().ok()?;

    let key = match name {
        "basic_cpuid" => Key::Basic,
        "ext_cpuid" => Key::Extended,
        "cache_cpuid4" => Key::Cache4,
        _ => return None,
    };

    let mut fields = values.split_whitespace();
    let eax = parse_hex(fields.next()?)?;
    let ebx = parse_hex(fields.next()?)?;
    let ecx = parse_hex(fields.next()?)?;
    let edx = parse_hex(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }

    Some((key, entry_index, Registers::new(eax, ebx, ecx, edx)))
}

pub(crate) fn encode(snapshots: &[ProcessorSnapshot]) -> String {
    let mut output = String::new();

    for snapshot in snapshots {
        for entry_index in 0..SECTION_ENTRIES {
            write_entry(
                &mut output,
                "basic_cpuid",
                entry_index,
                snapshot.store.get(entry_index, 0).unwrap_or(Registers::ZERO),
            );
        }

        for entry_index in 0..SECTION_ENTRIES {
            write_entry(
                &mut output,
                "ext_cpuid",
                entry_index,
                snapshot
                    .store
                    .get(EXTENDED_BASE + entry_index, 0)
                    .unwrap_or(Registers::ZERO),
            );
        }

        for (entry_index, (_, registers)) in
            snapshot.store.subleaves_sorted(0x4).into_iter().enumerate()
        {
            write_entry(
                &mut output,
                "cache_cpuid4",
                u32::try_from(entry_index).unwrap_or(u32::MAX),
                registers,
            );
        }
    }

    output
}

fn write_entry(output: &mut String, name: &str, entry_index: u32, registers: Registers) {
    writeln!(
        output,
        "{name}[{entry_index}]={:08x} {:08x} {:08x} {:08x}",
        registers.eax, registers.ebx, registers.ecx, registers.edx
    )
    .expect("writing to a String cannot fail");
}
