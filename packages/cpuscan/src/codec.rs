//! The textual dump formats.
//!
//! Each format can encode the snapshots of all processors into text and
//! decode such text back into snapshots. Decoders are forgiving: blank lines
//! and comments are skipped silently, while lines that look like data but do
//! not parse are collected as [`SkippedLine`] diagnostics for the caller to
//! surface. A malformed line never aborts the decode.

mod aida;
mod native;
mod percpu;
mod table;

use crate::scan::ProcessorSnapshot;
use crate::{Error, Leaf, ProcessorId, Registers, ResultStore, Subleaf};

/// The textual dump formats this crate can read and write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DumpFormat {
    /// The compact native format: one line per result, keyed by APIC id.
    Native,

    /// The verbose per-processor format with `CPU N:` headers.
    PerCpu,

    /// The fixed-layout key/index table format.
    Table,

    /// The report format of a well-known vendor diagnostics tool.
    Aida,
}

impl DumpFormat {
    /// Resolves a caller-announced format name.
    ///
    /// An unknown name is a configuration error; the format of a dump file is
    /// never guessed from its content.
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "native" => Ok(Self::Native),
            "percpu" => Ok(Self::PerCpu),
            "table" => Ok(Self::Table),
            "aida" => Ok(Self::Aida),
            _ => Err(Error::UnknownFormat {
                name: name.to_string(),
            }),
        }
    }

    /// The canonical name accepted by [`DumpFormat::from_name`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::PerCpu => "percpu",
            Self::Table => "table",
            Self::Aida => "aida",
        }
    }
}

/// One input line a decoder could not make sense of.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedLine {
    /// 1-based line number in the input text.
    pub line_number: usize,

    /// The line as it appeared in the input.
    pub content: String,
}

/// Everything a decode produced: the processors plus the lines that were
/// skipped along the way.
#[derive(Debug)]
pub struct DecodeOutcome {
    /// The decoded processors, ordered by processor id.
    pub snapshots: Vec<ProcessorSnapshot>,

    /// Diagnostics for lines that looked like data but did not parse.
    pub skipped: Vec<SkippedLine>,
}

pub(crate) fn decode(text: &str, format: DumpFormat) -> DecodeOutcome {
    match format {
        DumpFormat::Native => native::decode(text),
        DumpFormat::PerCpu => percpu::decode(text),
        DumpFormat::Table => table::decode(text),
        DumpFormat::Aida => aida::decode(text),
    }
}

pub(crate) fn encode(snapshots: &[ProcessorSnapshot], format: DumpFormat) -> String {
    match format {
        DumpFormat::Native => native::encode(snapshots),
        DumpFormat::PerCpu => percpu::encode(snapshots),
        DumpFormat::Table => table::encode(snapshots),
        DumpFormat::Aida => aida::encode(snapshots),
    }
}

/// Accumulates decoded results into per-processor stores and assigns the
/// final processor ids once the input is exhausted.
#[derive(Debug, Default)]
struct DumpBuilder {
    processors: Vec<RawProcessor>,
    skipped: Vec<SkippedLine>,
}

/// One processor as seen during decoding, before id assignment. The marker is
/// whatever the format used to separate processors (an APIC id, a declared
/// CPU number), which may collide between processors or be absent entirely.
#[derive(Debug)]
struct RawProcessor {
    marker: Option<u32>,
    store: ResultStore,
}

impl DumpBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Begins a new processor. Formats with explicit boundaries call this on
    /// every boundary line.
    fn start_processor(&mut self, marker: Option<u32>) {
        self.processors.push(RawProcessor {
            marker,
            store: ResultStore::new(),
        });
    }

    /// Records one result for the current processor. A body line before any
    /// boundary implicitly starts an unmarked processor.
    fn insert(&mut self, leaf: Leaf, subleaf: Subleaf, registers: Registers) {
        if self.processors.is_empty() {
            self.start_processor(None);
        }

        let current = self
            .processors
            .last_mut()
            .expect("a processor was just pushed if none existed");

        current.store.insert(leaf, subleaf, registers);
    }

    /// Records one result for the processor identified by the given marker,
    /// creating it on first sight. Used by formats where every line carries
    /// the processor marker instead of relying on boundaries.
    fn insert_for_marker(&mut self, marker: u32, leaf: Leaf, subleaf: Subleaf, registers: Registers) {
        if let Some(existing) = self
            .processors
            .iter_mut()
            .find(|processor| processor.marker == Some(marker))
        {
            existing.store.insert(leaf, subleaf, registers);
        } else {
            self.start_processor(Some(marker));
            self.insert(leaf, subleaf, registers);
        }
    }

    fn skip(&mut self, line_number: usize, content: &str) {
        self.skipped.push(SkippedLine {
            line_number,
            content: content.to_string(),
        });
    }

    /// Assigns processor ids and derives identities.
    ///
    /// A processor keeps its marker as its id when no earlier processor took
    /// it already; otherwise (and for unmarked processors) it receives the
    /// lowest id not yet in use. Processors that produced no results are
    /// dropped.
    fn finish(self) -> DecodeOutcome {
        let mut used: Vec<ProcessorId> = Vec::new();
        let mut snapshots: Vec<ProcessorSnapshot> = Vec::new();

        for processor in self.processors {
            if processor.store.is_empty() {
                continue;
            }

            let id = match processor.marker {
                Some(marker) if !used.contains(&marker) => marker,
                _ => next_free_id(&used),
            };

            used.push(id);
            snapshots.push(ProcessorSnapshot::new(id, processor.store));
        }

        snapshots.sort_by_key(|snapshot| snapshot.id);

        DecodeOutcome {
            snapshots,
            skipped: self.skipped,
        }
    }
}

fn next_free_id(used: &[ProcessorId]) -> ProcessorId {
    (0..).find(|candidate| !used.contains(candidate)).expect(
        "fewer than u32::MAX processors exist, so a free id below that is always available",
    )
}

/// Parses a hexadecimal field, with or without the `0x` prefix.
fn parse_hex(text: &str) -> Option<u32> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_resolves_known_formats() {
        assert_eq!(DumpFormat::from_name("native").unwrap(), DumpFormat::Native);
        assert_eq!(DumpFormat::from_name("percpu").unwrap(), DumpFormat::PerCpu);
        assert_eq!(DumpFormat::from_name("table").unwrap(), DumpFormat::Table);
        assert_eq!(DumpFormat::from_name("aida").unwrap(), DumpFormat::Aida);

        for format in [
            DumpFormat::Native,
            DumpFormat::PerCpu,
            DumpFormat::Table,
            DumpFormat::Aida,
        ] {
            assert_eq!(DumpFormat::from_name(format.name()).unwrap(), format);
        }
    }

    #[test]
    fn unknown_format_name_is_an_error() {
        let error = DumpFormat::from_name("json").unwrap_err();
        assert!(matches!(error, Error::UnknownFormat { name } if name == "json"));
    }

    #[test]
    fn builder_assigns_marker_ids_and_resolves_collisions() {
        let mut builder = DumpBuilder::new();

        builder.start_processor(Some(5));
        builder.insert(0x0, 0, Registers::new(1, 0, 0, 0));

        builder.start_processor(Some(5));
        builder.insert(0x0, 0, Registers::new(2, 0, 0, 0));

        builder.start_processor(None);
        builder.insert(0x0, 0, Registers::new(3, 0, 0, 0));

        let outcome = builder.finish();
        let ids: Vec<_> = outcome.snapshots.iter().map(|s| s.id).collect();

        // First taker keeps 5, the collision and the unmarked one get the
        // lowest free ids.
        assert_eq!(ids, vec![0, 1, 5]);
    }

    #[test]
    fn builder_drops_empty_processors() {
        let mut builder = DumpBuilder::new();
        builder.start_processor(Some(0));
        builder.start_processor(Some(1));
        builder.insert(0x0, 0, Registers::new(1, 0, 0, 0));

        let outcome = builder.finish();
        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.snapshots[0].id, 1);
    }

    #[test]
    fn body_line_before_any_boundary_starts_a_processor() {
        let mut builder = DumpBuilder::new();
        builder.insert(0x1, 0, Registers::new(1, 2, 3, 4));

        let outcome = builder.finish();
        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.snapshots[0].id, 0);
    }
}
