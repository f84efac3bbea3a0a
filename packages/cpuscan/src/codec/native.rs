//! The compact native format.
//!
//! One line per result, keyed by the full APIC id of the reporting processor:
//!
//! ```text
//! # comment
//! 00000000 00000001 00000000: 000106a5 00010800 80982201 178bfbff
//! ```
//!
//! The fields are `apic leaf subleaf: eax ebx ecx edx`, all hexadecimal.
//! Lines of different processors may interleave; a distinct APIC id field is
//! the processor boundary. Two processors with the same APIC id cannot be
//! told apart on input, so the encoder renumbers duplicates.

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

        if let Some((marker, leaf, subleaf, registers)) = parse_line(line) {
            builder.insert_for_marker(marker, leaf, subleaf, registers);
        } else {
            builder.skip(index + 1, raw_line);
        }
    }

    builder.finish()
}

fn parse_line(line: &str) -> Option<(u32, u32, u32, Registers)> {
    let (selector, values) = line.split_once(':')?;

    let mut selector_fields = selector.split_whitespace();
    let marker = parse_hex(selector_fields.next()?)?;
    let leaf = parse_hex(selector_fields.next()?)?;
    let subleaf = parse_hex(selector_fields.next()?)?;
    if selector_fields.next().is_some() {
        return None;
    }

    let mut value_fields = values.split_whitespace();
    let eax = parse_hex(value_fields.next()?)?;
    let ebx = parse_hex(value_fields.next()?)?;
    let ecx = parse_hex(value_fields.next()?)?;
    let edx = parse_hex(value_fields.next()?)?;
    if value_fields.next().is_some() {
        return None;
    }

    Some((marker, leaf, subleaf, Registers::new(eax, ebx, ecx, edx)))
}

pub(crate) fn encode(snapshots: &[ProcessorSnapshot]) -> String {
    let mut output = String::new();
    let mut used_markers: Vec<u32> = Vec::new();

    for snapshot in snapshots {
        // The APIC id is the processor boundary on input, so duplicates (or
        // processors that reported none) must be renumbered to stay distinct.
        let preferred = snapshot.identity.full_apic_id.unwrap_or(snapshot.id);
        let marker = if used_markers.contains(&preferred) {
            (0..)
                .find(|candidate| !used_markers.contains(candidate))
                .expect("fewer than u32::MAX processors exist, so a free marker is always available")
        } else {
            preferred
        };
        used_markers.push(marker);

        for (leaf, subleaf, registers) in snapshot.store.iter_sorted() {
            writeln!(
                output,
                "{marker:08x} {leaf:08x} {subleaf:08x}: {:08x} {:08x} {:08x} {:08x}",
                registers.eax, registers.ebx, registers.ecx, registers.edx
            )
            .expect("writing to a String cannot fail");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_interleaved_processors() {
        let text = "\
# two processors, interleaved
00000000 00000000 00000000: 00000001 756e6547 6c65746e 49656e69
00000001 00000000 00000000: 00000001 756e6547 6c65746e 49656e69
00000000 00000001 00000000: 000106a5 00000800 00000000 00000000

00000001 00000001 00000000: 000106a5 01000800 00000000 00000000
";

        let outcome = decode(text);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.snapshots.len(), 2);

        assert_eq!(outcome.snapshots[0].id, 0);
        assert_eq!(outcome.snapshots[0].store.len(), 2);
        assert_eq!(
            outcome.snapshots[1].store.get(0x1, 0),
            Some(Registers::new(0x000106a5, 0x01000800, 0, 0))
        );
    }

    #[test]
    fn malformed_lines_are_reported_not_fatal() {
        let text = "\
00000000 00000000 00000000: 00000001 756e6547 6c65746e 49656e69
this is not a dump line
00000000 00000001: 000106a5 00000800 00000000 00000000
";

        let outcome = decode(text);
        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.snapshots[0].store.len(), 1);

        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.skipped[0].line_number, 2);
        assert_eq!(outcome.skipped[1].line_number, 3);
    }

    #[test]
    fn encode_renumbers_duplicate_apic_ids() {
        use crate::ResultStore;

        let mut store = ResultStore::new();
        store.insert(0x1, 0, Registers::new(0, 0x0700_0000, 0, 0));

        // Both processors report APIC id 7.
        let snapshots = vec![
            ProcessorSnapshot::new(0, store.clone()),
            ProcessorSnapshot::new(1, store),
        ];

        let text = encode(&snapshots);
        let outcome = decode(&text);

        assert_eq!(outcome.snapshots.len(), 2);
    }
}
