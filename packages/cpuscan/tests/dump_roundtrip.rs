//! End-to-end encode/decode behavior across the dump formats.

use cpuscan::{DumpFormat, Error, ProcessorSnapshot, Registers, ResultStore};

// "GenuineIntel" packed into EBX, EDX, ECX of leaf 0.
const VENDOR: (u32, u32, u32) = (0x756e_6547, 0x4965_6e69, 0x6c65_746e);

fn sample_store(apic_id: u32) -> ResultStore {
    let (ebx, edx, ecx) = VENDOR;

    let mut store = ResultStore::new();

    // Deliberately not in numeric order; the codecs normalize on output.
    store.insert(0x8000_0000, 0, Registers::new(0x8000_0008, 0, 0, 0));
    store.insert(0x0, 0, Registers::new(0xb, ebx, ecx, edx));
    store.insert(0xb, 1, Registers::new(4, 4, 0x201, apic_id));
    store.insert(0xb, 0, Registers::new(1, 2, 0x100, apic_id));
    store.insert(0x1, 0, Registers::new(0x000106a5, apic_id << 24, 0, 0x1f8b_fbff));

    store
}

fn result_set(store: &ResultStore) -> Vec<(u32, u32, Registers)> {
    store.iter_sorted().collect()
}

#[test]
fn native_round_trip_normalizes_order() {
    let snapshots = vec![
        ProcessorSnapshot::new(0, sample_store(0)),
        ProcessorSnapshot::new(1, sample_store(1)),
    ];

    let text = cpuscan::print_dump(&snapshots, DumpFormat::Native);
    let outcome = cpuscan::enumerate_file(&text, DumpFormat::Native).unwrap();

    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.snapshots.len(), 2);

    for (original, decoded) in snapshots.iter().zip(&outcome.snapshots) {
        // Identical result sets, regardless of original insertion order.
        assert_eq!(result_set(&original.store), result_set(&decoded.store));

        // The decoded store itself is in ascending numeric order.
        let insertion: Vec<_> = decoded
            .store
            .iter()
            .map(|(leaf, subleaf, _)| (leaf, subleaf))
            .collect();
        let mut sorted = insertion.clone();
        sorted.sort_unstable();
        assert_eq!(insertion, sorted);

        // Identity survives the trip.
        assert_eq!(original.identity, decoded.identity);
    }
}

#[test]
fn every_format_preserves_the_result_sets() {
    let snapshots = vec![
        ProcessorSnapshot::new(0, sample_store(0)),
        ProcessorSnapshot::new(1, sample_store(1)),
    ];

    // The table format is excluded: its fixed layout only carries subleaf 0
    // of the general leaves, so it is lossy by design.
    for format in [DumpFormat::Native, DumpFormat::PerCpu, DumpFormat::Aida] {
        let text = cpuscan::print_dump(&snapshots, format);
        let outcome = cpuscan::enumerate_file(&text, format).unwrap();

        assert!(
            outcome.skipped.is_empty(),
            "{}: {:?}",
            format.name(),
            outcome.skipped
        );
        assert_eq!(outcome.snapshots.len(), 2, "{}", format.name());

        for (original, decoded) in snapshots.iter().zip(&outcome.snapshots) {
            assert_eq!(
                result_set(&original.store),
                result_set(&decoded.store),
                "{}",
                format.name()
            );
        }
    }
}

#[test]
fn formats_can_be_converted_through_each_other() {
    let snapshots = vec![ProcessorSnapshot::new(0, sample_store(0))];

    let native = cpuscan::print_dump(&snapshots, DumpFormat::Native);

    // native -> percpu -> aida -> native
    let percpu_snapshots = cpuscan::enumerate_file(&native, DumpFormat::Native)
        .unwrap()
        .snapshots;
    let percpu = cpuscan::print_dump(&percpu_snapshots, DumpFormat::PerCpu);

    let aida_snapshots = cpuscan::enumerate_file(&percpu, DumpFormat::PerCpu)
        .unwrap()
        .snapshots;
    let aida = cpuscan::print_dump(&aida_snapshots, DumpFormat::Aida);

    let final_snapshots = cpuscan::enumerate_file(&aida, DumpFormat::Aida)
        .unwrap()
        .snapshots;

    assert_eq!(
        cpuscan::print_dump(&final_snapshots, DumpFormat::Native),
        native
    );
}

#[test]
fn table_format_keeps_cache_subleaves_but_not_general_ones() {
    let mut store = sample_store(0);
    store.insert(0x4, 0, Registers::new(0x21, 0x3f, 0x3f, 0));
    store.insert(0x4, 1, Registers::new(0x42, 0x3f, 0x3f, 0));

    let snapshots = vec![ProcessorSnapshot::new(0, store)];
    let text = cpuscan::print_dump(&snapshots, DumpFormat::Table);
    let outcome = cpuscan::enumerate_file(&text, DumpFormat::Table).unwrap();

    let decoded = &outcome.snapshots[0].store;

    // The cache leaf has a dedicated section, so its subleaves survive.
    assert_eq!(decoded.subleaf_count(0x4), 2);

    // The fixed layout has one slot per general leaf: subleaf 0 only.
    assert_eq!(decoded.subleaf_count(0xb), 1);
    assert!(decoded.get(0xb, 0).is_some());
}

#[test]
fn unknown_format_name_is_fatal() {
    assert!(matches!(
        DumpFormat::from_name("yaml"),
        Err(Error::UnknownFormat { name }) if name == "yaml"
    ));
}

#[test]
fn duplicate_apic_ids_stay_separate_processors() {
    // Two processors that report the same APIC id everywhere.
    let snapshots = vec![
        ProcessorSnapshot::new(0, sample_store(5)),
        ProcessorSnapshot::new(1, sample_store(5)),
    ];

    let text = cpuscan::print_dump(&snapshots, DumpFormat::Native);
    let outcome = cpuscan::enumerate_file(&text, DumpFormat::Native).unwrap();

    assert_eq!(outcome.snapshots.len(), 2);
}

#[test]
fn decoded_identity_matches_live_derivation() {
    let outcome = cpuscan::enumerate_file(
        &cpuscan::print_dump(
            &[ProcessorSnapshot::new(0, sample_store(2))],
            DumpFormat::Table,
        ),
        DumpFormat::Table,
    )
    .unwrap();

    let identity = &outcome.snapshots[0].identity;
    assert_eq!(identity.vendor_string.as_deref(), Some("GenuineIntel"));
    assert_eq!(identity.family, 0x6);
    assert_eq!(identity.model, 0x1a);
    assert_eq!(identity.stepping, 0x5);
    // The v1 topology leaf EDX is the widest APIC id source present.
    assert_eq!(identity.full_apic_id, Some(2));
}
