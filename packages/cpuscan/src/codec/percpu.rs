//! The verbose per-processor format.
//!
//! Recurring `CPU N:` header lines open a processor section; each body line
//! carries one result:
//!
//! ```text
//! CPU 0:
//!    0x00000000 0x00: eax=0x0000000b ebx=0x756e6547 ecx=0x6c65746e edx=0x49656e69
//! ```

use std::fmt::Write;

use super::{parse_hex, DecodeOutcome, DumpBuilder};
use crate::scan::ProcessorSnapshot;
use crate::Registers;

pub(crate) fn decode(text: &str) -> DecodeOutcome {
    let mut builder = DumpBuilder::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(marker) = parse_header(line) {
            builder.start_processor(marker);
            continue;
        }

        if let Some((leaf, subleaf, registers)) = parse_body(line) {
            builder.insert(leaf, subleaf, registers);
        } else {
            builder.skip(index + 1, raw_line);
        }
    }

    builder.finish()
}

/// `CPU N:`. A header missing its number still opens a section, just an
/// unmarked one.
fn parse_header(line: &str) -> Option<Option<u32>> {
    let rest = line.strip_prefix("CPU")?.strip_suffix(':')?.trim();
    Some(rest.parse().ok())
}

/// `0xLEAF 0xSUBLEAF: eax=0x.. ebx=0x.. ecx=0x.. edx=0x..`
fn parse_body(line: &str) -> Option<(u32, u32, Registers)> {
    let (selector, values) = line.split_once(':')?;

    let mut selector_fields = selector.split_whitespace();
    let leaf = parse_hex(selector_fields.next()?)?;
    let subleaf = parse_hex(selector_fields.next()?)?;
    if selector_fields.next().is_some() {
        return None;
    }

    let mut registers = Registers::ZERO;

    let mut count = 0;
    for field in values.split_whitespace() {
        let (name, value) = field.split_once('=')?;
        let value = parse_hex(value)?;

        match name {
            "eax" => registers.eax = value,
            "ebx" => registers.ebx = value,
            "ecx" => registers.ecx = value,
            "edx" => registers.edx = value,
            _ => return None,
        }

        count += 1;
    }

    (count == 4).then_some((leaf, subleaf, registers))
}

pub(crate) fn encode(snapshots: &[ProcessorSnapshot]) -> String {
    let mut output = String::new();

    for snapshot in snapshots {
        writeln!(output, "CPU {}:", snapshot.id).expect("writing to a String cannot fail");

        for (leaf, subleaf, registers) in snapshot.store.iter_sorted() {
            writeln!(
                output,
                "   0x{leaf:08x} 0x{subleaf:02x}: eax=0x{:08x} ebx=0x{:08x} ecx=0x{:08x} edx=0x{:08x}",
                registers.eax, registers.ebx, registers.ecx, registers.edx
            )
            .expect("writing to a String cannot fail");
        }
    }

    output
}
