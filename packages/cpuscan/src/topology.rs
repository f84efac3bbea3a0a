use std::collections::BTreeMap;
use std::fmt;

use derive_more::Display;
use itertools::Itertools;
use nonempty::NonEmpty;

use crate::registers::{bit_range, low_mask};
use crate::scan::ProcessorSnapshot;
use crate::{ProcessorId, Registers, ResultStore, EXTENDED_BASE};

/// Number of low APIC id bits reserved for each level of the processor
/// hierarchy. A zero width means the level does not exist (or could not be
/// determined, in which case all widths are zero and the topology is flat).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MaskWidths {
    /// Bits distinguishing threads within a core.
    pub thread: u32,

    /// Bits distinguishing cores within the next level up.
    pub core: u32,

    /// Bits distinguishing modules, when the hardware reports that level.
    pub module: u32,

    /// Bits distinguishing tiles, when the hardware reports that level.
    pub tile: u32,

    /// Bits distinguishing dies, when the hardware reports that level.
    pub die: u32,
}

impl MaskWidths {
    /// Total bits below the package id.
    #[must_use]
    pub const fn package_shift(&self) -> u32 {
        self.thread + self.core + self.module + self.tile + self.die
    }

    /// Whether no hierarchy information is available at all.
    #[must_use]
    pub const fn is_flat(&self) -> bool {
        self.package_shift() == 0
    }
}

/// One APIC id decomposed into its hierarchy levels.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ApicIdParts {
    /// Thread index within the core.
    pub thread: u32,

    /// Core index within the module (or package, when no middle levels exist).
    pub core: u32,

    /// Module index, zero when the level is not reported.
    pub module: u32,

    /// Tile index, zero when the level is not reported.
    pub tile: u32,

    /// Die index, zero when the level is not reported.
    pub die: u32,

    /// Package index: everything above the per-package levels.
    pub package: u32,
}

/// Minimal number of bits needed to represent `count` distinct values,
/// i.e. the smallest `w` with `2^w >= count`. Zero and one need no bits.
#[must_use]
pub fn generate_mask(count: u32) -> u32 {
    if count <= 1 {
        0
    } else {
        32 - (count - 1).leading_zeros()
    }
}

/// Extracts `width` bits of `value` starting at `shift`, with both clamped so
/// that out-of-range widths read as zero instead of wrapping.
const fn extract(value: u32, shift: u32, width: u32) -> u32 {
    if shift >= 32 || width == 0 {
        0
    } else {
        (value >> shift) & low_mask(width)
    }
}

/// Decomposes an APIC id into hierarchy levels using the given widths.
///
/// With flat (all-zero) widths everything lands in the package field, so
/// every processor appears as its own package.
#[must_use]
pub fn split_apic_id(apic_id: u32, widths: &MaskWidths) -> ApicIdParts {
    let mut shift = 0;

    let mut take = |width: u32| {
        let part = extract(apic_id, shift, width);
        shift += width;
        part
    };

    let thread = take(widths.thread);
    let core = take(widths.core);
    let module = take(widths.module);
    let tile = take(widths.tile);
    let die = take(widths.die);

    let package = if shift >= 32 { 0 } else { apic_id >> shift };

    ApicIdParts {
        thread,
        core,
        module,
        tile,
        die,
        package,
    }
}

/// Reassembles an APIC id from its parts. Inverse of [`split_apic_id`] for
/// parts that fit their widths.
#[must_use]
pub fn compose_apic_id(parts: &ApicIdParts, widths: &MaskWidths) -> u32 {
    let mut value = 0_u32;
    let mut shift = 0;

    let mut put = |part: u32, width: u32| {
        if shift < 32 && width > 0 {
            value |= (part & low_mask(width)) << shift;
        }
        shift += width;
    };

    put(parts.thread, widths.thread);
    put(parts.core, widths.core);
    put(parts.module, widths.module);
    put(parts.tile, widths.tile);
    put(parts.die, widths.die);

    if shift < 32 {
        value |= parts.package << shift;
    }

    value
}

// Level type codes of the extended topology leaves.
const LEVEL_SMT: u32 = 1;
const LEVEL_CORE: u32 = 2;
const LEVEL_MODULE: u32 = 3;
const LEVEL_TILE: u32 = 4;
const LEVEL_DIE: u32 = 5;

/// Determines the mask widths from one representative processor's results.
///
/// Sources in preference order: the v2 topology leaf (0x1F), the v1 topology
/// leaf (0xB), the legacy logical-count/core-count fields, or zero widths
/// when none of those are present.
#[must_use]
pub fn mask_widths(store: &ResultStore) -> MaskWidths {
    for leaf in [0x1f, 0xb] {
        if let Some(widths) = widths_from_topology_leaf(store, leaf) {
            return sanitize(widths);
        }
    }

    sanitize(widths_from_legacy_leaves(store))
}

/// The topology leaves report cumulative shifts per level; the per-level
/// width is the difference from the level below.
fn widths_from_topology_leaf(store: &ResultStore, leaf: u32) -> Option<MaskWidths> {
    if !store.has_leaf(leaf) {
        return None;
    }

    let mut widths = MaskWidths::default();
    let mut previous_shift = 0;
    let mut any_level = false;

    for (_, registers) in store.subleaves_sorted(leaf) {
        let level_type = bit_range(registers.ecx, 15, 8);
        let cumulative_shift = bit_range(registers.eax, 4, 0);
        let width = cumulative_shift.saturating_sub(previous_shift);

        match level_type {
            LEVEL_SMT => widths.thread = cumulative_shift,
            LEVEL_CORE => widths.core = width,
            LEVEL_MODULE => widths.module = width,
            LEVEL_TILE => widths.tile = width,
            LEVEL_DIE => widths.die = width,
            _ => continue,
        }

        previous_shift = cumulative_shift;
        any_level = true;
    }

    any_level.then_some(widths)
}

fn widths_from_legacy_leaves(store: &ResultStore) -> MaskWidths {
    let Some(leaf1) = store.get(0x1, 0) else {
        return MaskWidths::default();
    };
    let Some(leaf4) = store.get(0x4, 0) else {
        return MaskWidths::default();
    };

    let logical_per_package = bit_range(leaf1.ebx, 23, 16).max(1);
    let cores_per_package = bit_range(leaf4.eax, 31, 26) + 1;
    let threads_per_core = (logical_per_package / cores_per_package).max(1);

    MaskWidths {
        thread: generate_mask(threads_per_core),
        core: generate_mask(cores_per_package),
        ..MaskWidths::default()
    }
}

/// Widths that cannot fit an APIC id degrade to flat rather than producing
/// ambiguous decompositions.
fn sanitize(widths: MaskWidths) -> MaskWidths {
    if widths.package_shift() > 32 {
        MaskWidths::default()
    } else {
        widths
    }
}

/// What a cache stores.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum CacheKind {
    /// Data only.
    #[display("data")]
    Data,

    /// Instructions only.
    #[display("instruction")]
    Instruction,

    /// Both data and instructions.
    #[display("unified")]
    Unified,
}

/// One cache of the processor, as reported by the deterministic cache leaves
/// or reconstructed from the legacy extended leaves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheDescriptor {
    /// Cache level (1, 2, 3).
    pub level: u32,

    /// What the cache stores.
    pub kind: CacheKind,

    /// Associativity. Zero when the reporting leaf does not carry it.
    pub ways: u32,

    /// Physical line partitions. Zero when the reporting leaf does not carry it.
    pub partitions: u32,

    /// Line size in bytes.
    pub line_size: u32,

    /// Number of sets. Zero when the reporting leaf does not carry it.
    pub sets: u32,

    /// Total capacity in bytes.
    pub total_size: u64,

    /// Number of low APIC id bits that do NOT have to match for two
    /// processors to share this cache. 32 means the sharing scope is unknown
    /// and every processor groups together.
    pub sharing_id_bits: u32,
}

impl CacheDescriptor {
    /// Decodes one subleaf of a deterministic cache leaf (0x4 or its AMD
    /// equivalent). Returns `None` for the null cache type.
    #[must_use]
    pub fn from_deterministic(registers: Registers) -> Option<Self> {
        let kind = match bit_range(registers.eax, 4, 0) {
            1 => CacheKind::Data,
            2 => CacheKind::Instruction,
            3 => CacheKind::Unified,
            _ => return None,
        };

        let level = bit_range(registers.eax, 7, 5);
        let ways = bit_range(registers.ebx, 31, 22) + 1;
        let partitions = bit_range(registers.ebx, 21, 12) + 1;
        let line_size = bit_range(registers.ebx, 11, 0) + 1;
        let sets = registers.ecx.wrapping_add(1);

        let total_size =
            u64::from(ways) * u64::from(partitions) * u64::from(line_size) * u64::from(sets);

        let max_threads_sharing = bit_range(registers.eax, 25, 14) + 1;

        Some(Self {
            level,
            kind,
            ways,
            partitions,
            line_size,
            sets,
            total_size,
            sharing_id_bits: generate_mask(max_threads_sharing),
        })
    }

    /// The APIC id bits that must match for two processors to share this
    /// cache: the complement of the low sharing bits.
    #[must_use]
    pub const fn sharing_mask(&self) -> u32 {
        !low_mask(self.sharing_id_bits)
    }
}

impl fmt::Display for CacheDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L{} {} cache, {} KiB",
            self.level,
            self.kind,
            self.total_size / 1024
        )?;

        if self.ways != 0 {
            write!(f, ", {}-way", self.ways)?;
        }

        if self.line_size != 0 {
            write!(f, ", {} B lines", self.line_size)?;
        }

        Ok(())
    }
}

/// The caches of the legacy extended leaves, which report sizes but no
/// sharing scope.
fn legacy_caches(store: &ResultStore) -> Vec<CacheDescriptor> {
    let mut caches = Vec::new();

    if let Some(registers) = store.get(EXTENDED_BASE + 0x5, 0) {
        for (value, kind) in [
            (registers.ecx, CacheKind::Data),
            (registers.edx, CacheKind::Instruction),
        ] {
            let size_kb = bit_range(value, 31, 24);
            if size_kb != 0 {
                caches.push(legacy_descriptor(
                    1,
                    kind,
                    u64::from(size_kb) * 1024,
                    bit_range(value, 23, 16),
                    bit_range(value, 7, 0),
                ));
            }
        }
    }

    if let Some(registers) = store.get(EXTENDED_BASE + 0x6, 0) {
        let l2_kb = bit_range(registers.ecx, 31, 16);
        if l2_kb != 0 {
            caches.push(legacy_descriptor(
                2,
                CacheKind::Unified,
                u64::from(l2_kb) * 1024,
                bit_range(registers.ecx, 15, 12),
                bit_range(registers.ecx, 7, 0),
            ));
        }

        // The L3 size field counts in 512 KiB units.
        let l3_units = bit_range(registers.edx, 31, 18);
        if l3_units != 0 {
            caches.push(legacy_descriptor(
                3,
                CacheKind::Unified,
                u64::from(l3_units) * 512 * 1024,
                bit_range(registers.edx, 15, 12),
                bit_range(registers.edx, 7, 0),
            ));
        }
    }

    caches
}

fn legacy_descriptor(
    level: u32,
    kind: CacheKind,
    total_size: u64,
    ways: u32,
    line_size: u32,
) -> CacheDescriptor {
    CacheDescriptor {
        level,
        kind,
        ways,
        partitions: 0,
        line_size,
        sets: 0,
        total_size,
        sharing_id_bits: 32,
    }
}

/// The caches of one processor, from the best available source: the Intel
/// deterministic cache leaf, the AMD deterministic cache leaf, or the legacy
/// extended leaves.
#[must_use]
pub fn caches(store: &ResultStore) -> Vec<CacheDescriptor> {
    for leaf in [0x4, EXTENDED_BASE + 0x1d] {
        let deterministic: Vec<_> = store
            .subleaves_sorted(leaf)
            .into_iter()
            .filter_map(|(_, registers)| CacheDescriptor::from_deterministic(registers))
            .collect();

        if !deterministic.is_empty() {
            return deterministic;
        }
    }

    legacy_caches(store)
}

/// The processors sharing one instance of a cache.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SharingGroup {
    /// The masked APIC id selecting this instance.
    pub selector: u32,

    /// The processors in the group, ordered by processor id.
    pub members: NonEmpty<ProcessorId>,
}

/// One cache kind/level together with all its instances across the system.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheTopology {
    /// The cache, as reported by the representative processor.
    pub descriptor: CacheDescriptor,

    /// Its instances, ordered by selector.
    pub groups: Vec<SharingGroup>,
}

/// One logical processor's place in the hierarchy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogicalCore {
    /// Operating system processor id.
    pub id: ProcessorId,

    /// Full APIC id, zero when the processor reported none.
    pub apic_id: u32,

    /// The APIC id decomposed by the system-wide mask widths.
    pub parts: ApicIdParts,
}

/// The reconstructed hierarchy of the whole system.
#[derive(Clone, Debug)]
pub struct SystemTopology {
    /// The widths used for every decomposition.
    pub widths: MaskWidths,

    /// Every observed logical processor, ordered by processor id.
    pub cores: Vec<LogicalCore>,

    /// `package id → core id → thread id → processor ids`. Ordered maps for
    /// deterministic reporting.
    pub packages: BTreeMap<u32, BTreeMap<u32, BTreeMap<u32, Vec<ProcessorId>>>>,

    /// Every cache with its sharing groups.
    pub caches: Vec<CacheTopology>,
}

impl SystemTopology {
    /// Number of distinct packages observed.
    #[must_use]
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Number of distinct cores observed across all packages.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.packages.values().map(BTreeMap::len).sum()
    }

    /// Number of logical processors observed.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.cores.len()
    }
}

impl fmt::Display for SystemTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} package(s), {} core(s), {} logical processor(s)",
            self.package_count(),
            self.core_count(),
            self.thread_count()
        )?;

        for (package, cores) in &self.packages {
            writeln!(f, "package {package}")?;

            for (core, threads) in cores {
                let processors = threads
                    .values()
                    .flatten()
                    .map(|id| id.to_string())
                    .join(", ");

                writeln!(f, "  core {core}: processors {processors}")?;
            }
        }

        for cache in &self.caches {
            writeln!(f, "{}", cache.descriptor)?;

            for group in &cache.groups {
                let members = group.members.iter().map(|id| id.to_string()).join(", ");
                writeln!(f, "  instance 0x{:x}: processors {}", group.selector, members)?;
            }
        }

        Ok(())
    }
}

/// Reconstructs the system hierarchy from the snapshots of all processors.
///
/// The first snapshot acts as the representative for mask widths and cache
/// shapes; the decomposition is applied to every processor's APIC id. With no
/// snapshots the topology is empty; with no topology leaves it is flat.
#[must_use]
pub fn build_topology(snapshots: &[ProcessorSnapshot]) -> SystemTopology {
    let widths = snapshots
        .first()
        .map(|snapshot| mask_widths(&snapshot.store))
        .unwrap_or_default();

    let mut cores: Vec<LogicalCore> = snapshots
        .iter()
        .map(|snapshot| {
            let apic_id = snapshot.identity.full_apic_id.unwrap_or(0);

            LogicalCore {
                id: snapshot.id,
                apic_id,
                parts: split_apic_id(apic_id, &widths),
            }
        })
        .collect();

    cores.sort_by_key(|core| core.id);

    let mut packages: BTreeMap<u32, BTreeMap<u32, BTreeMap<u32, Vec<ProcessorId>>>> =
        BTreeMap::new();

    for core in &cores {
        // In a flat decomposition every processor has a distinct package id
        // (the whole APIC id), which correctly claims nothing about sharing.
        packages
            .entry(core.parts.package)
            .or_default()
            .entry(merged_core_id(&core.parts))
            .or_default()
            .entry(core.parts.thread)
            .or_default()
            .push(core.id);
    }

    let cache_shapes = snapshots
        .first()
        .map(|snapshot| caches(&snapshot.store))
        .unwrap_or_default();

    let caches = cache_shapes
        .into_iter()
        .map(|descriptor| CacheTopology {
            descriptor,
            groups: sharing_groups(&cores, &descriptor),
        })
        .collect();

    SystemTopology {
        widths,
        cores,
        packages,
        caches,
    }
}

/// The core key within a package folds in the middle levels so that two cores
/// in different modules/tiles/dies never collide.
fn merged_core_id(parts: &ApicIdParts) -> u32 {
    // The middle levels are a handful of bits each on real hardware, so one
    // byte per level keeps the folded keys distinct.
    let mut id = parts.core;
    id = id.wrapping_add(parts.module.wrapping_shl(8));
    id = id.wrapping_add(parts.tile.wrapping_shl(16));
    id.wrapping_add(parts.die.wrapping_shl(24))
}

/// Groups processors by the APIC id bits that must match to share the cache.
fn sharing_groups(cores: &[LogicalCore], descriptor: &CacheDescriptor) -> Vec<SharingGroup> {
    let mut by_selector: BTreeMap<u32, Vec<ProcessorId>> = BTreeMap::new();

    for core in cores {
        by_selector
            .entry(core.apic_id & descriptor.sharing_mask())
            .or_default()
            .push(core.id);
    }

    by_selector
        .into_iter()
        .filter_map(|(selector, members)| {
            Some(SharingGroup {
                selector,
                members: NonEmpty::from_vec(members)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_mask_is_minimal_width() {
        assert_eq!(generate_mask(0), 0);
        assert_eq!(generate_mask(1), 0);
        assert_eq!(generate_mask(2), 1);
        assert_eq!(generate_mask(3), 2);
        assert_eq!(generate_mask(4), 2);
        assert_eq!(generate_mask(5), 3);
        assert_eq!(generate_mask(u32::MAX), 32);
    }

    #[test]
    fn split_and_compose_are_inverse() {
        let widths = MaskWidths {
            thread: 1,
            core: 3,
            die: 2,
            ..MaskWidths::default()
        };

        for apic_id in [0_u32, 1, 0b10_1101_1, 0x37, 0xffff, 0xdead_beef] {
            let parts = split_apic_id(apic_id, &widths);
            assert_eq!(compose_apic_id(&parts, &widths), apic_id);
        }

        // Flat widths: everything is package.
        let parts = split_apic_id(0x42, &MaskWidths::default());
        assert_eq!(parts.package, 0x42);
        assert_eq!(parts.thread, 0);
        assert_eq!(compose_apic_id(&parts, &MaskWidths::default()), 0x42);
    }

    #[test]
    fn split_clamps_oversized_widths() {
        let widths = MaskWidths {
            thread: 16,
            core: 16,
            ..MaskWidths::default()
        };

        let parts = split_apic_id(0xaaaa_5555, &widths);
        assert_eq!(parts.thread, 0x5555);
        assert_eq!(parts.core, 0xaaaa);
        assert_eq!(parts.package, 0);
    }

    #[test]
    fn widths_from_v1_topology_leaf() {
        let mut store = ResultStore::new();
        store.insert(0xb, 0, Registers::new(1, 2, LEVEL_SMT << 8, 0));
        store.insert(0xb, 1, Registers::new(4, 8, (LEVEL_CORE << 8) | 1, 0));

        let widths = mask_widths(&store);
        assert_eq!(widths.thread, 1);
        assert_eq!(widths.core, 3);
        assert_eq!(widths.module, 0);
    }

    #[test]
    fn v2_topology_leaf_preferred_and_reports_die() {
        let mut store = ResultStore::new();
        // v1 present but disagrees.
        store.insert(0xb, 0, Registers::new(2, 2, LEVEL_SMT << 8, 0));
        // v2 reports SMT(1), core(+3), die(+2).
        store.insert(0x1f, 0, Registers::new(1, 2, LEVEL_SMT << 8, 0));
        store.insert(0x1f, 1, Registers::new(4, 4, (LEVEL_CORE << 8) | 1, 0));
        store.insert(0x1f, 2, Registers::new(6, 2, (LEVEL_DIE << 8) | 2, 0));

        let widths = mask_widths(&store);
        assert_eq!(widths.thread, 1);
        assert_eq!(widths.core, 3);
        assert_eq!(widths.die, 2);
        assert_eq!(widths.package_shift(), 6);
    }

    #[test]
    fn widths_from_legacy_fields() {
        let mut store = ResultStore::new();
        // 8 logical processors per package, 4 cores per package.
        store.insert(0x1, 0, Registers::new(0, 8 << 16, 0, 0));
        store.insert(0x4, 0, Registers::new((3 << 26) | 1, 0, 0, 0));

        let widths = mask_widths(&store);
        assert_eq!(widths.thread, 1);
        assert_eq!(widths.core, 2);
    }

    #[test]
    fn no_topology_information_means_flat() {
        let mut store = ResultStore::new();
        store.insert(0x1, 0, Registers::new(0, 8 << 16, 0, 0));

        let widths = mask_widths(&store);
        assert!(widths.is_flat());
    }

    #[test]
    fn deterministic_cache_decoding() {
        // L2 unified, 4-way, 64 B lines, 1024 sets, shared by 2 threads.
        let registers = Registers::new((1 << 14) | (2 << 5) | 3, (3 << 22) | 63, 1023, 0);

        let cache = CacheDescriptor::from_deterministic(registers).unwrap();
        assert_eq!(cache.level, 2);
        assert_eq!(cache.kind, CacheKind::Unified);
        assert_eq!(cache.ways, 4);
        assert_eq!(cache.line_size, 64);
        assert_eq!(cache.sets, 1024);
        assert_eq!(cache.total_size, 4 * 64 * 1024);
        assert_eq!(cache.sharing_id_bits, 1);
        assert_eq!(cache.sharing_mask(), !1);

        // Null cache type terminates.
        assert!(CacheDescriptor::from_deterministic(Registers::ZERO).is_none());
    }

    #[test]
    fn legacy_caches_have_unknown_sharing() {
        let mut store = ResultStore::new();
        // L1d 32 KiB, L1i 64 KiB.
        store.insert(
            EXTENDED_BASE + 0x5,
            0,
            Registers::new(0, 0, (32 << 24) | (8 << 16) | 64, (64 << 24) | (4 << 16) | 64),
        );
        // L2 512 KiB, L3 4 MiB (8 units of 512 KiB).
        store.insert(
            EXTENDED_BASE + 0x6,
            0,
            Registers::new(0, 0, (512 << 16) | (6 << 12) | 64, (8 << 18) | 64),
        );

        let caches = caches(&store);
        assert_eq!(caches.len(), 4);

        let l3 = caches.iter().find(|cache| cache.level == 3).unwrap();
        assert_eq!(l3.total_size, 4 * 1024 * 1024);
        assert_eq!(l3.sharing_id_bits, 32);
        assert_eq!(l3.sharing_mask(), 0);
    }

    #[test]
    fn deterministic_caches_preferred_over_legacy() {
        let mut store = ResultStore::new();
        store.insert(
            0x4,
            0,
            Registers::new((2 << 5) | 3, (3 << 22) | 63, 1023, 0),
        );
        store.insert(
            EXTENDED_BASE + 0x6,
            0,
            Registers::new(0, 0, (512 << 16) | 64, 0),
        );

        let caches = caches(&store);
        assert_eq!(caches.len(), 1);
        assert_eq!(caches[0].level, 2);
    }
}
