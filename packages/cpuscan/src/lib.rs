//! Query the x86 `CPUID` instruction across all logical processors, store the
//! raw results, decode them into structured hardware facts and reconstruct
//! the physical topology (package/core/thread hierarchy and cache-sharing
//! domains).
//!
//! Results come from live enumeration ([`enumerate_processors`]) or from
//! replaying a textual dump in one of several formats ([`enumerate_file`]).
//! Either way, each logical processor yields a [`ProcessorSnapshot`]: the raw
//! `(leaf, subleaf) → registers` results plus the identity decoded from
//! them. Snapshots feed the topology reconstructor ([`build_topology`]), the
//! dump encoder ([`print_dump`]) and the flag evaluator ([`flag_query`]).
//!
//! # Example
//!
//! Replaying a two-processor dump and reconstructing its topology:
//!
//! ```
//! use cpuscan::{DumpFormat, VendorMask};
//!
//! let dump = "\
//! 00000000 00000000 00000000: 00000001 756e6547 6c65746e 49656e69
//! 00000000 00000001 00000000: 000106a5 00000800 00000000 00000000
//! 00000001 00000000 00000000: 00000001 756e6547 6c65746e 49656e69
//! 00000001 00000001 00000000: 000106a5 01000800 00000000 00000000
//! ";
//!
//! let outcome = cpuscan::enumerate_file(dump, DumpFormat::Native).unwrap();
//! assert_eq!(outcome.snapshots.len(), 2);
//! assert!(outcome.snapshots[0]
//!     .identity
//!     .vendors
//!     .intersects(VendorMask::INTEL));
//!
//! let topology = cpuscan::build_topology(&outcome.snapshots);
//! assert_eq!(topology.thread_count(), 2);
//! ```

mod codec;
mod descriptor;
mod engine;
mod error;
mod identity;
mod pal;
mod primitive_types;
mod registers;
mod result_store;
mod scan;
mod topology;

pub mod flag_query;

pub use codec::{DecodeOutcome, DumpFormat, SkippedLine};
pub use descriptor::{DescriptorEntry, DescriptorTable, Filter, LeafKind};
pub use engine::EnumerationOptions;
pub use error::{Error, Result};
pub use identity::ProcessorIdentity;
pub use primitive_types::{
    Leaf, ProcessorId, Subleaf, VendorMask, EXTENDED_BASE, HYPERVISOR_BASE, STANDARD_BASE,
};
pub use registers::{bit, bit_range, low_mask, Registers};
pub use result_store::ResultStore;
pub use scan::{
    enumerate_file, enumerate_processors, print_dump, select_processor, ProcessorSnapshot,
};
pub use topology::{
    build_topology, caches, compose_apic_id, generate_mask, mask_widths, split_apic_id,
    ApicIdParts, CacheDescriptor, CacheKind, CacheTopology, LogicalCore, MaskWidths, SharingGroup,
    SystemTopology,
};

pub(crate) use identity::SECONDARY_HYPERVISOR_OFFSET;
