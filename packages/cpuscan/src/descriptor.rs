use std::sync::LazyLock;

use foldhash::{HashMap, HashMapExt};
use leafspec::Register;

use crate::registers::low_mask;
use crate::{Leaf, ResultStore, Subleaf, VendorMask, EXTENDED_BASE};

/// How the subleaves of a leaf are discovered during enumeration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeafKind {
    /// Only subleaf 0 carries data; no subleaf walk is performed.
    FixedMain,

    /// Subleaves are queried upward from 0 until one answers with
    /// `EAX & mask == 0`. The terminating answer is not recorded.
    ZeroTerminated {
        /// Bits of EAX that distinguish a real subleaf from the terminator.
        mask: u32,
    },

    /// The topology level enumeration protocol: subleaf 0 is always recorded,
    /// and the walk continues while the answer reports a nonzero level type
    /// in `ECX[15:8]`.
    ExtendedTopology,

    /// Subleaf 0's EAX announces the highest valid subleaf; all of
    /// `0..=EAX` are queried.
    SubleafCountInEax,

    /// The extended state protocol: subleaves 0 and 1 are always queried, and
    /// subleaves 2..=63 are queried only where the combined feature bitmap of
    /// subleaf 0 (EAX/EDX) and subleaf 1 (ECX/EDX) has the matching bit set.
    XsaveMask,
}

/// A prerequisite on an already-recorded result that gates whether a leaf is
/// worth querying at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Filter {
    /// Leaf of the prerequisite result.
    pub leaf: Leaf,

    /// Subleaf of the prerequisite result.
    pub subleaf: Subleaf,

    /// Register of the prerequisite result.
    pub register: Register,

    /// The filter passes when `value & mask != 0`.
    pub mask: u32,
}

impl Filter {
    const fn bit(leaf: Leaf, subleaf: Subleaf, register: Register, index: u32) -> Self {
        Self {
            leaf,
            subleaf,
            register,
            mask: 1 << index,
        }
    }

    /// Whether the prerequisite holds in the given results. A missing
    /// prerequisite result fails the filter.
    #[must_use]
    pub fn is_satisfied(&self, store: &ResultStore) -> bool {
        store
            .get(self.leaf, self.subleaf)
            .is_some_and(|registers| registers.get(self.register) & self.mask != 0)
    }
}

/// Everything the enumeration engine needs to know about one leaf.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DescriptorEntry {
    /// Vendors on which this leaf carries meaningful data.
    pub vendors: VendorMask,

    /// How the subleaves of this leaf are discovered.
    pub kind: LeafKind,

    /// Optional feature prerequisite; `None` means the leaf is
    /// unconditionally queried on matching vendors.
    pub filter: Option<Filter>,
}

impl DescriptorEntry {
    const fn new(vendors: VendorMask, kind: LeafKind) -> Self {
        Self {
            vendors,
            kind,
            filter: None,
        }
    }

    const fn with_filter(vendors: VendorMask, kind: LeafKind, filter: Filter) -> Self {
        Self {
            vendors,
            kind,
            filter: Some(filter),
        }
    }
}

/// Maps leaves to their enumeration behavior.
///
/// Leaves without an entry default to [`LeafKind::FixedMain`] on any vendor,
/// so the table only has to describe the leaves that deviate.
#[derive(Debug)]
pub struct DescriptorTable {
    entries: HashMap<Leaf, DescriptorEntry>,
}

impl DescriptorTable {
    /// Creates a table from explicit entries.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (Leaf, DescriptorEntry)>) -> Self {
        let mut map = HashMap::new();
        map.extend(entries);
        Self { entries: map }
    }

    /// The table describing the publicly documented leaves of the known
    /// vendors.
    #[must_use]
    pub fn built_in() -> &'static Self {
        static TABLE: LazyLock<DescriptorTable> = LazyLock::new(built_in_entries);
        &TABLE
    }

    /// Returns the entry describing the given leaf, if it deviates from the
    /// defaults.
    #[must_use]
    pub fn get(&self, leaf: Leaf) -> Option<&DescriptorEntry> {
        self.entries.get(&leaf)
    }
}

// Common prerequisite bits, named after the feature flag that publishes them.
const SGX: Filter = Filter::bit(0x7, 0, Register::Ebx, 2);
const XSAVE: Filter = Filter::bit(0x1, 0, Register::Ecx, 26);
const DCA: Filter = Filter::bit(0x1, 0, Register::Ecx, 18);
const RDT_M: Filter = Filter::bit(0x7, 0, Register::Ebx, 12);
const RDT_A: Filter = Filter::bit(0x7, 0, Register::Ebx, 15);
const INTEL_PT: Filter = Filter::bit(0x7, 0, Register::Ebx, 25);
const PCONFIG: Filter = Filter::bit(0x7, 0, Register::Edx, 18);
const AMX: Filter = Filter::bit(0x7, 0, Register::Edx, 24);
const SVM: Filter = Filter::bit(EXTENDED_BASE + 0x1, 0, Register::Ecx, 2);
const TOPOEXT: Filter = Filter::bit(EXTENDED_BASE + 0x1, 0, Register::Ecx, 22);

fn built_in_entries() -> DescriptorTable {
    use DescriptorEntry as E;
    use LeafKind::{ExtendedTopology, FixedMain, SubleafCountInEax, XsaveMask, ZeroTerminated};
    use VendorMask as V;

    let amd_like = V::AMD | V::HYGON;

    let entries = [
        // Standard region. Leaf 0 and unlisted leaves default to FixedMain/ANY.
        (0x2, E::new(V::INTEL, FixedMain)),
        (0x3, E::new(V::INTEL, FixedMain)),
        (
            0x4,
            E::new(V::INTEL, ZeroTerminated { mask: low_mask(5) }),
        ),
        (0x7, E::new(V::ANY, SubleafCountInEax)),
        (0x9, E::with_filter(V::INTEL, FixedMain, DCA)),
        (0xa, E::new(V::INTEL, FixedMain)),
        (0xb, E::new(V::INTEL | amd_like, ExtendedTopology)),
        (0xd, E::with_filter(V::ANY, XsaveMask, XSAVE)),
        (0xf, E::with_filter(V::INTEL, FixedMain, RDT_M)),
        (0x10, E::with_filter(V::INTEL, FixedMain, RDT_A)),
        (
            0x12,
            E::with_filter(V::INTEL, ZeroTerminated { mask: low_mask(4) }, SGX),
        ),
        (0x14, E::with_filter(V::INTEL, SubleafCountInEax, INTEL_PT)),
        (0x15, E::new(V::INTEL, FixedMain)),
        (0x16, E::new(V::INTEL, FixedMain)),
        (0x17, E::new(V::INTEL, SubleafCountInEax)),
        (0x18, E::new(V::INTEL, SubleafCountInEax)),
        (0x19, E::new(V::INTEL, FixedMain)),
        (0x1a, E::new(V::INTEL, FixedMain)),
        (
            0x1b,
            E::with_filter(V::INTEL, ZeroTerminated { mask: low_mask(12) }, PCONFIG),
        ),
        (0x1d, E::with_filter(V::INTEL, SubleafCountInEax, AMX)),
        (0x1e, E::with_filter(V::INTEL, FixedMain, AMX)),
        (0x1f, E::new(V::INTEL, ExtendedTopology)),
        // Hypervisor region. The base leaf is handled by the region walk; the
        // interface leaves past the base are vendor specific.
        (0x4000_0001, E::new(V::ANY_HYPERVISOR, FixedMain)),
        (0x4000_0002, E::new(V::HYPERV, FixedMain)),
        (0x4000_0003, E::new(V::HYPERV, FixedMain)),
        (0x4000_0004, E::new(V::HYPERV, FixedMain)),
        (0x4000_0005, E::new(V::HYPERV, FixedMain)),
        (0x4000_0006, E::new(V::HYPERV, FixedMain)),
        (0x4000_0007, E::new(V::HYPERV, FixedMain)),
        (0x4000_0008, E::new(V::HYPERV, FixedMain)),
        (0x4000_0009, E::new(V::HYPERV, FixedMain)),
        (0x4000_000a, E::new(V::HYPERV, FixedMain)),
        // Extended region.
        (
            EXTENDED_BASE + 0x5,
            E::new(amd_like | V::CENTAUR, FixedMain),
        ),
        (
            EXTENDED_BASE + 0xa,
            E::with_filter(amd_like, FixedMain, SVM),
        ),
        (EXTENDED_BASE + 0x19, E::new(V::AMD, FixedMain)),
        (EXTENDED_BASE + 0x1a, E::new(V::AMD, FixedMain)),
        (
            EXTENDED_BASE + 0x1d,
            E::with_filter(amd_like, ZeroTerminated { mask: low_mask(5) }, TOPOEXT),
        ),
        (
            EXTENDED_BASE + 0x1e,
            E::with_filter(amd_like, FixedMain, TOPOEXT),
        ),
        (EXTENDED_BASE + 0x1f, E::new(V::AMD, FixedMain)),
        (EXTENDED_BASE + 0x20, E::new(V::AMD, SubleafCountInEax)),
    ];

    DescriptorTable::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registers, HYPERVISOR_BASE};

    #[test]
    fn built_in_table_knows_documented_leaves() {
        let table = DescriptorTable::built_in();

        assert_eq!(
            table.get(0x4).map(|entry| entry.kind),
            Some(LeafKind::ZeroTerminated { mask: 0x1f })
        );
        assert_eq!(
            table.get(0xb).map(|entry| entry.kind),
            Some(LeafKind::ExtendedTopology)
        );
        assert_eq!(
            table.get(0xd).map(|entry| entry.kind),
            Some(LeafKind::XsaveMask)
        );

        // Unlisted leaves have no entry; enumeration applies defaults.
        assert!(table.get(0x5).is_none());
        assert!(table.get(0x1).is_none());
    }

    #[test]
    fn filter_requires_recorded_prerequisite() {
        let filter = Filter::bit(0x1, 0, Register::Ecx, 26);

        let mut store = ResultStore::new();
        assert!(!filter.is_satisfied(&store));

        store.insert(0x1, 0, Registers::new(0, 0, 0, 0));
        assert!(!filter.is_satisfied(&store));

        store.insert(0x1, 0, Registers::new(0, 0, 1 << 26, 0));
        assert!(filter.is_satisfied(&store));
    }

    #[test]
    fn hypervisor_leaves_are_vendor_gated() {
        let table = DescriptorTable::built_in();

        let generic = table.get(HYPERVISOR_BASE + 0x1).unwrap();
        assert!(generic.vendors.intersects(VendorMask::KVM));
        assert!(generic.vendors.intersects(VendorMask::HYPERV));

        let hyperv_only = table.get(HYPERVISOR_BASE + 0x3).unwrap();
        assert!(hyperv_only.vendors.intersects(VendorMask::HYPERV));
        assert!(!hyperv_only.vendors.intersects(VendorMask::KVM));
    }
}
