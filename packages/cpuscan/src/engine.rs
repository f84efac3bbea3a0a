use crate::descriptor::{DescriptorTable, LeafKind};
use crate::identity::is_valid_region_max;
use crate::registers::{bit, bit_range, Registers};
use crate::{
    identity, Leaf, ResultStore, Subleaf, VendorMask, EXTENDED_BASE, HYPERVISOR_BASE,
    SECONDARY_HYPERVISOR_OFFSET, STANDARD_BASE,
};

/// Widest a leaf region may be. A base leaf reporting a maximum further out
/// than this is treated as not implementing the region.
pub(crate) const REGION_SPAN: u32 = 0xffff;

/// Hard cap on subleaves recorded per leaf, for forward progress against
/// hardware that never signals termination.
const MAX_SUBLEAVES: u32 = 512;

/// Adjustable knobs of the enumeration walk. The defaults describe the
/// normal, fully gated walk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EnumerationOptions {
    /// Ignore the descriptor table's subleaf strategies and probe every leaf
    /// with the generic heuristic walk instead.
    pub brute_force: bool,

    /// Query vendor-specific leaves even on non-matching vendors.
    pub skip_vendor_check: bool,

    /// Query leaves even when their feature prerequisite bit is clear.
    pub skip_feature_check: bool,
}

/// The single query seam between the enumeration walk and whatever answers
/// it: real hardware via the platform layer, or fake hardware in tests.
pub(crate) trait LeafQuery {
    fn query(&self, leaf: Leaf, subleaf: Subleaf) -> Registers;
}

/// Walks every implemented leaf region of one processor and records the
/// results. The caller is responsible for running this on the processor it
/// wants to observe (thread pinning happens a layer above).
pub(crate) fn enumerate_one(
    query: &impl LeafQuery,
    table: &DescriptorTable,
    options: EnumerationOptions,
) -> ResultStore {
    let mut store = ResultStore::new();

    // Standard region. The base leaf announces the region maximum and the
    // silicon vendor, which gates everything after it.
    let base = query.query(STANDARD_BASE, 0);
    store.insert(STANDARD_BASE, 0, base);

    let mut vendors = identity::vendors(&store);

    for leaf in region_leaves(STANDARD_BASE, base.eax) {
        enumerate_leaf(query, table, options, vendors, leaf, &mut store);

        // Leaf 1 announces hypervisor presence, which refines the gate for
        // the rest of the region.
        if leaf == 0x1 && hypervisor_present(&store) {
            enumerate_hypervisor_region(query, table, options, &mut store);
            vendors = identity::vendors(&store);
        }
    }

    // Extended region. Only walked when the base answers with a plausible
    // in-region maximum.
    let extended_base = query.query(EXTENDED_BASE, 0);
    if is_valid_region_max(EXTENDED_BASE, extended_base.eax) {
        store.insert(EXTENDED_BASE, 0, extended_base);

        for leaf in region_leaves(EXTENDED_BASE, extended_base.eax) {
            enumerate_leaf(query, table, options, vendors, leaf, &mut store);
        }
    }

    store
}

/// The leaves after the base of a region, clamped into the region. An
/// implausible maximum yields an empty walk instead of a wild one.
fn region_leaves(base: Leaf, reported_max: u32) -> std::ops::RangeInclusive<Leaf> {
    if !is_valid_region_max(base, reported_max) {
        // Empty range.
        #[expect(
            clippy::reversed_empty_ranges,
            reason = "an intentionally empty range expresses 'region not implemented'"
        )]
        return 1..=0;
    }

    base + 1..=reported_max
}

fn hypervisor_present(store: &ResultStore) -> bool {
    store
        .get(0x1, 0)
        .is_some_and(|registers| bit(registers.ecx, 31))
}

/// Walks the hypervisor region's primary signature block and, when a vendor
/// exposes one, the secondary block one fixed offset above it.
fn enumerate_hypervisor_region(
    query: &impl LeafQuery,
    table: &DescriptorTable,
    options: EnumerationOptions,
    store: &mut ResultStore,
) {
    let base = query.query(HYPERVISOR_BASE, 0);
    store.insert(HYPERVISOR_BASE, 0, base);

    let vendors = identity::vendors(store);

    for leaf in region_leaves(HYPERVISOR_BASE, base.eax) {
        enumerate_leaf(query, table, options, vendors, leaf, store);
    }

    // Some hypervisors stack a second interface block above the first
    // (e.g. KVM underneath Hyper-V emulation). One hop only.
    let secondary_base = HYPERVISOR_BASE + SECONDARY_HYPERVISOR_OFFSET;
    let secondary = query.query(secondary_base, 0);

    if !secondary.is_all_zero() && is_valid_region_max(secondary_base, secondary.eax) {
        store.insert(secondary_base, 0, secondary);

        let vendors = identity::vendors(store);

        for leaf in region_leaves(secondary_base, secondary.eax) {
            enumerate_leaf(query, table, options, vendors, leaf, store);
        }
    }
}

/// Applies the gates and the subleaf strategy for one leaf.
fn enumerate_leaf(
    query: &impl LeafQuery,
    table: &DescriptorTable,
    options: EnumerationOptions,
    vendors: VendorMask,
    leaf: Leaf,
    store: &mut ResultStore,
) {
    // Brute-force mode ignores the descriptor table entirely: every leaf in
    // the region is probed heuristically, gates included.
    if options.brute_force {
        brute_force_walk(query, leaf, store);
        return;
    }

    let Some(entry) = table.get(leaf) else {
        // Undescribed leaves default to a single-subleaf query.
        record_main(query, leaf, store);
        return;
    };

    // Vendor gate. An unrecognized vendor cannot be gated, so it passes.
    if !options.skip_vendor_check
        && !vendors.is_empty()
        && !entry.vendors.intersects(vendors)
    {
        return;
    }

    // Feature prerequisite gate.
    if !options.skip_feature_check
        && entry
            .filter
            .is_some_and(|filter| !filter.is_satisfied(store))
    {
        return;
    }

    match entry.kind {
        LeafKind::FixedMain => record_main(query, leaf, store),
        LeafKind::ZeroTerminated { mask } => zero_terminated_walk(query, leaf, mask, store),
        LeafKind::ExtendedTopology => extended_topology_walk(query, leaf, store),
        LeafKind::SubleafCountInEax => counted_walk(query, leaf, store),
        LeafKind::XsaveMask => xsave_walk(query, leaf, store),
    }
}

fn record_main(query: &impl LeafQuery, leaf: Leaf, store: &mut ResultStore) {
    store.insert(leaf, 0, query.query(leaf, 0));
}

/// Records subleaves upward from 0 until one answers with `EAX & mask == 0`.
/// The terminating answer is not recorded, even at subleaf 0.
fn zero_terminated_walk(query: &impl LeafQuery, leaf: Leaf, mask: u32, store: &mut ResultStore) {
    for subleaf in 0..MAX_SUBLEAVES {
        let registers = query.query(leaf, subleaf);

        if registers.eax & mask == 0 {
            break;
        }

        store.insert(leaf, subleaf, registers);
    }
}

/// The topology level protocol: subleaf 0 is meaningful even when it reports
/// an invalid level type, and the walk continues while the level type in
/// `ECX[15:8]` is nonzero.
fn extended_topology_walk(query: &impl LeafQuery, leaf: Leaf, store: &mut ResultStore) {
    for subleaf in 0..MAX_SUBLEAVES {
        let registers = query.query(leaf, subleaf);

        if subleaf > 0 && bit_range(registers.ecx, 15, 8) == 0 {
            break;
        }

        store.insert(leaf, subleaf, registers);

        if bit_range(registers.ecx, 15, 8) == 0 {
            break;
        }
    }
}

/// Subleaf 0's EAX bounds the walk: all of `0..=EAX` are recorded.
fn counted_walk(query: &impl LeafQuery, leaf: Leaf, store: &mut ResultStore) {
    let main = query.query(leaf, 0);
    store.insert(leaf, 0, main);

    let last = main.eax.min(MAX_SUBLEAVES - 1);

    for subleaf in 1..=last {
        store.insert(leaf, subleaf, query.query(leaf, subleaf));
    }
}

/// The extended state protocol: subleaves 0 and 1 are architectural, and each
/// further subleaf describes one state component, present only where the
/// combined bitmap of subleaf 0 (EDX:EAX) and subleaf 1 (EDX:ECX) has the
/// matching bit set.
fn xsave_walk(query: &impl LeafQuery, leaf: Leaf, store: &mut ResultStore) {
    let main = query.query(leaf, 0);
    store.insert(leaf, 0, main);

    let second = query.query(leaf, 1);
    store.insert(leaf, 1, second);

    let bitmap = u64::from(main.eax)
        | (u64::from(main.edx) << 32)
        | u64::from(second.ecx)
        | (u64::from(second.edx) << 32);

    for subleaf in 2..=63 {
        if bitmap & (1_u64 << subleaf) == 0 {
            continue;
        }

        let registers = query.query(leaf, subleaf);

        if registers.is_all_zero() {
            continue;
        }

        store.insert(leaf, subleaf, registers);
    }
}

/// The heuristic walk for undescribed leaves: subleaf 0 is always recorded,
/// later subleaves until the hardware visibly stops answering with fresh
/// data.
fn brute_force_walk(query: &impl LeafQuery, leaf: Leaf, store: &mut ResultStore) {
    let main = query.query(leaf, 0);
    store.insert(leaf, 0, main);

    let mut previous = main;

    for subleaf in 1..MAX_SUBLEAVES {
        let registers = query.query(leaf, subleaf);

        // Hardware that ignores the subleaf index answers all-zero, echoes
        // the index back in ECX, or repeats the previous answer verbatim.
        let echoes_index = registers.eax == 0
            && registers.ebx == 0
            && registers.edx == 0
            && registers.ecx == subleaf;

        if registers.is_all_zero() || echoes_index || registers == previous {
            break;
        }

        store.insert(leaf, subleaf, registers);
        previous = registers;
    }
}
