//! Evaluates parsed [`FlagSpec`] selectors against a processor's results.
//!
//! Named flags resolve through a static table of architectural feature
//! fields. The table covers the commonly queried flags; it is a name
//! directory, not a full decoder of every documented field.

use std::fmt::{self, Display};
use std::sync::LazyLock;

use foldhash::{HashMap, HashMapExt};
use leafspec::{Field, FlagSpec, Register};

use crate::registers::bit_range;
use crate::{Leaf, ResultStore, Subleaf, EXTENDED_BASE};

/// One named field of one register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FeatureField {
    /// Lowercase flag name as accepted in selector notation.
    pub name: &'static str,

    /// Highest bit of the field, inclusive.
    pub hi: u32,

    /// Lowest bit of the field, inclusive.
    pub lo: u32,
}

const fn flag(name: &'static str, bit: u32) -> FeatureField {
    FeatureField {
        name,
        hi: bit,
        lo: bit,
    }
}

const fn field(name: &'static str, hi: u32, lo: u32) -> FeatureField {
    FeatureField { name, hi, lo }
}

/// Maps registers to their named fields.
#[derive(Debug)]
pub struct FeatureTable {
    fields: HashMap<(Leaf, Subleaf, Register), &'static [FeatureField]>,
}

impl FeatureTable {
    /// Creates a table from explicit register entries.
    #[must_use]
    pub fn new(
        entries: impl IntoIterator<Item = ((Leaf, Subleaf, Register), &'static [FeatureField])>,
    ) -> Self {
        let mut fields = HashMap::new();
        fields.extend(entries);
        Self { fields }
    }

    /// The built-in directory of architectural flags.
    #[must_use]
    pub fn built_in() -> &'static Self {
        static TABLE: LazyLock<FeatureTable> = LazyLock::new(built_in_fields);
        &TABLE
    }

    /// Looks a name up in the fields of one exact register.
    #[must_use]
    pub fn get(&self, leaf: Leaf, subleaf: Subleaf, register: Register, name: &str) -> Option<FeatureField> {
        self.fields
            .get(&(leaf, subleaf, register))?
            .iter()
            .find(|candidate| candidate.name == name)
            .copied()
    }
}

static LEAF1_ECX: &[FeatureField] = &[
    flag("sse3", 0),
    flag("pclmulqdq", 1),
    flag("vmx", 5),
    flag("ssse3", 9),
    flag("fma", 12),
    flag("pcid", 17),
    flag("dca", 18),
    flag("sse4_1", 19),
    flag("sse4_2", 20),
    flag("x2apic", 21),
    flag("movbe", 22),
    flag("popcnt", 23),
    flag("aes", 25),
    flag("xsave", 26),
    flag("osxsave", 27),
    flag("avx", 28),
    flag("f16c", 29),
    flag("rdrand", 30),
    flag("hypervisor", 31),
];

static LEAF1_EDX: &[FeatureField] = &[
    flag("fpu", 0),
    flag("pse", 3),
    flag("tsc", 4),
    flag("msr", 5),
    flag("pae", 6),
    flag("apic", 9),
    flag("mtrr", 12),
    flag("pat", 16),
    flag("clfsh", 19),
    flag("mmx", 23),
    flag("fxsr", 24),
    flag("sse", 25),
    flag("sse2", 26),
    flag("htt", 28),
];

static LEAF1_EBX: &[FeatureField] = &[
    field("brand_index", 7, 0),
    field("clflush_size", 15, 8),
    field("max_logical", 23, 16),
    field("init_apic_id", 31, 24),
];

static LEAF7_EBX: &[FeatureField] = &[
    flag("fsgsbase", 0),
    flag("sgx", 2),
    flag("bmi1", 3),
    flag("hle", 4),
    flag("avx2", 5),
    flag("smep", 7),
    flag("bmi2", 8),
    flag("erms", 9),
    flag("invpcid", 10),
    flag("rtm", 11),
    flag("rdt_m", 12),
    flag("rdt_a", 15),
    flag("avx512f", 16),
    flag("rdseed", 18),
    flag("adx", 19),
    flag("smap", 20),
    flag("clflushopt", 23),
    flag("clwb", 24),
    flag("intel_pt", 25),
    flag("sha", 29),
];

static LEAF7_ECX: &[FeatureField] = &[
    flag("umip", 2),
    flag("pku", 3),
    flag("waitpkg", 5),
    flag("gfni", 8),
    flag("vaes", 9),
    flag("vpclmulqdq", 10),
    flag("rdpid", 22),
    flag("cldemote", 25),
    flag("movdiri", 27),
    flag("movdir64b", 28),
];

static LEAF7_EDX: &[FeatureField] = &[
    flag("md_clear", 10),
    flag("serialize", 14),
    flag("pconfig", 18),
    flag("amx_bf16", 22),
    flag("amx_tile", 24),
    flag("amx_int8", 25),
    flag("ibrs", 26),
    flag("stibp", 27),
    flag("l1d_flush", 28),
    flag("ssbd", 31),
];

static EXT1_ECX: &[FeatureField] = &[
    flag("lahf_lm", 0),
    flag("svm", 2),
    flag("abm", 5),
    flag("sse4a", 6),
    flag("prefetchw", 8),
    flag("xop", 11),
    flag("fma4", 16),
    flag("tbm", 21),
    flag("topoext", 22),
];

static EXT1_EDX: &[FeatureField] = &[
    flag("syscall", 11),
    flag("nx", 20),
    flag("mmxext", 22),
    flag("page1gb", 26),
    flag("rdtscp", 27),
    flag("lm", 29),
    flag("3dnowext", 30),
    flag("3dnow", 31),
];

fn built_in_fields() -> FeatureTable {
    FeatureTable::new([
        ((0x1, 0, Register::Ebx), LEAF1_EBX),
        ((0x1, 0, Register::Ecx), LEAF1_ECX),
        ((0x1, 0, Register::Edx), LEAF1_EDX),
        ((0x7, 0, Register::Ebx), LEAF7_EBX),
        ((0x7, 0, Register::Ecx), LEAF7_ECX),
        ((0x7, 0, Register::Edx), LEAF7_EDX),
        ((EXTENDED_BASE + 0x1, 0, Register::Ecx), EXT1_ECX),
        ((EXTENDED_BASE + 0x1, 0, Register::Edx), EXT1_EDX),
    ])
}

/// The outcome of evaluating one selector against one processor's results.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlagAnswer {
    /// The selected leaf/subleaf was not recorded for this processor.
    NoData,

    /// The selector named a flag the directory does not know for that
    /// register.
    UnknownName {
        /// The name as given in the selector.
        name: String,
    },

    /// The whole selected register.
    Raw(u32),

    /// One extracted field, shifted down to bit 0.
    Field {
        /// The directory name, when the selector used one.
        name: Option<&'static str>,

        /// Highest bit of the extracted range.
        hi: u32,

        /// Lowest bit of the extracted range.
        lo: u32,

        /// The extracted value.
        value: u32,
    },
}

impl Display for FlagAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => f.write_str("no data"),
            Self::UnknownName { name } => write!(f, "unknown flag name: {name}"),
            Self::Raw(value) => write!(f, "0x{value:08x}"),
            Self::Field { name, hi, lo, value } => {
                if let Some(name) = name {
                    write!(f, "{name} ")?;
                }

                if hi == lo {
                    write!(f, "[{hi}] = {value}")
                } else {
                    write!(f, "[{hi}:{lo}] = 0x{value:x}")
                }
            }
        }
    }
}

/// Evaluates a selector against one processor's results using the built-in
/// flag directory.
#[must_use]
pub fn evaluate(spec: &FlagSpec, store: &ResultStore) -> FlagAnswer {
    evaluate_with_table(spec, store, FeatureTable::built_in())
}

/// Evaluates a selector with a caller-supplied flag directory.
///
/// Absence is an answer, not an error: a missing leaf/subleaf answers
/// [`FlagAnswer::NoData`] and an unresolvable name answers
/// [`FlagAnswer::UnknownName`].
#[must_use]
pub fn evaluate_with_table(
    spec: &FlagSpec,
    store: &ResultStore,
    table: &FeatureTable,
) -> FlagAnswer {
    let Some(registers) = store.get(spec.leaf, spec.subleaf) else {
        return FlagAnswer::NoData;
    };

    let value = registers.get(spec.register);

    match &spec.field {
        Field::Whole => FlagAnswer::Raw(value),
        Field::Bits { hi, lo } => FlagAnswer::Field {
            name: None,
            hi: *hi,
            lo: *lo,
            value: bit_range(value, *hi, *lo),
        },
        Field::Named(name) => {
            let Some(resolved) = table.get(spec.leaf, spec.subleaf, spec.register, name) else {
                return FlagAnswer::UnknownName { name: name.clone() };
            };

            FlagAnswer::Field {
                name: Some(resolved.name),
                hi: resolved.hi,
                lo: resolved.lo,
                value: bit_range(value, resolved.hi, resolved.lo),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registers;

    fn store_with_leaf7() -> ResultStore {
        let mut store = ResultStore::new();
        store.insert(0x7, 0, Registers::new(0, (1 << 5) | (1 << 2), 0, 0));
        store
    }

    fn spec(text: &str) -> FlagSpec {
        leafspec::parse(text).unwrap()
    }

    #[test]
    fn named_flag_resolves_and_extracts() {
        let store = store_with_leaf7();

        let answer = evaluate(&spec("0x7:ebx.avx2"), &store);
        assert_eq!(
            answer,
            FlagAnswer::Field {
                name: Some("avx2"),
                hi: 5,
                lo: 5,
                value: 1,
            }
        );
        assert_eq!(answer.to_string(), "avx2 [5] = 1");

        let answer = evaluate(&spec("0x7:ebx.rdseed"), &store);
        assert_eq!(
            answer,
            FlagAnswer::Field {
                name: Some("rdseed"),
                hi: 18,
                lo: 18,
                value: 0,
            }
        );
    }

    #[test]
    fn explicit_bits_and_whole_register() {
        let mut store = ResultStore::new();
        store.insert(0x1, 0, Registers::new(0, 0x0702_0800, 0, 0));

        let answer = evaluate(&spec("0x1:ebx[31:24]"), &store);
        assert_eq!(
            answer,
            FlagAnswer::Field {
                name: None,
                hi: 31,
                lo: 24,
                value: 7,
            }
        );

        // The named form of the same field agrees.
        let named = evaluate(&spec("0x1:ebx.init_apic_id"), &store);
        assert!(
            matches!(named, FlagAnswer::Field { value: 7, .. }),
            "{named:?}"
        );

        assert_eq!(
            evaluate(&spec("0x1:ebx"), &store),
            FlagAnswer::Raw(0x0702_0800)
        );
    }

    #[test]
    fn absence_is_an_answer_not_an_error() {
        let store = store_with_leaf7();

        // Missing leaf.
        assert_eq!(evaluate(&spec("0x14:ecx[3]"), &store), FlagAnswer::NoData);

        // Missing subleaf of a present leaf.
        assert_eq!(evaluate(&spec("0x7.1:ebx"), &store), FlagAnswer::NoData);

        // Known leaf, name the directory does not carry for that register.
        let answer = evaluate(&spec("0x7:ebx.not_a_flag"), &store);
        assert_eq!(
            answer,
            FlagAnswer::UnknownName {
                name: "not_a_flag".to_string()
            }
        );

        // Names are register-scoped: avx2 lives in EBX, not ECX.
        let mut store = store_with_leaf7();
        store.insert(0x7, 0, Registers::new(0, 0, u32::MAX, 0));
        assert!(matches!(
            evaluate(&spec("0x7:ecx.avx2"), &store),
            FlagAnswer::UnknownName { .. }
        ));
    }

    #[test]
    fn extended_leaf_names_resolve() {
        let mut store = ResultStore::new();
        store.insert(
            EXTENDED_BASE + 0x1,
            0,
            Registers::new(0, 0, 1 << 22, 1 << 29),
        );

        assert!(matches!(
            evaluate(&spec("0x80000001:ecx.topoext"), &store),
            FlagAnswer::Field { value: 1, .. }
        ));
        assert!(matches!(
            evaluate(&spec("0x80000001:edx.lm"), &store),
            FlagAnswer::Field { value: 1, .. }
        ));
    }
}
