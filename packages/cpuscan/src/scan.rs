use std::thread;

use crate::codec::{self, DecodeOutcome, DumpFormat};
use crate::descriptor::DescriptorTable;
use crate::engine::{self, EnumerationOptions, LeafQuery};
use crate::pal::{Platform, PlatformFacade};
use crate::{Error, Leaf, ProcessorId, ProcessorIdentity, Registers, ResultStore, Subleaf};

/// The complete results of one logical processor: its raw store plus the
/// identity decoded from it.
#[derive(Clone, Debug)]
pub struct ProcessorSnapshot {
    /// Operating system processor id (or the id recovered from a dump).
    pub id: ProcessorId,

    /// The raw results.
    pub store: ResultStore,

    /// The identity decoded from the store.
    pub identity: ProcessorIdentity,
}

impl ProcessorSnapshot {
    /// Wraps a store, deriving the identity from it.
    #[must_use]
    pub fn new(id: ProcessorId, store: ResultStore) -> Self {
        let identity = ProcessorIdentity::from_store(&store);

        Self {
            id,
            store,
            identity,
        }
    }
}

impl LeafQuery for PlatformFacade {
    fn query(&self, leaf: Leaf, subleaf: Subleaf) -> Registers {
        self.query_current(leaf, subleaf)
    }
}

/// Enumerates every logical processor of the live system.
///
/// One thread per processor, each pinned before querying so the results
/// really describe that processor. Processors whose thread fails do not
/// prevent the others from being collected.
pub fn enumerate_processors(options: EnumerationOptions) -> crate::Result<Vec<ProcessorSnapshot>> {
    enumerate_with_platform(&PlatformFacade::real(), options)
}

pub(crate) fn enumerate_with_platform(
    platform: &PlatformFacade,
    options: EnumerationOptions,
) -> crate::Result<Vec<ProcessorSnapshot>> {
    let processor_ids = platform.active_processor_ids();

    if processor_ids.is_empty() {
        return Err(Error::NoProcessors);
    }

    let handles: Vec<_> = processor_ids
        .into_iter()
        .map(|id| {
            let platform = platform.clone();

            thread::spawn(move || {
                platform.pin_current_thread_to(id);

                let store = engine::enumerate_one(&platform, DescriptorTable::built_in(), options);

                ProcessorSnapshot::new(id, store)
            })
        })
        .collect();

    let mut snapshots: Vec<_> = handles
        .into_iter()
        .filter_map(|handle| handle.join().ok())
        .collect();

    if snapshots.is_empty() {
        return Err(Error::NoProcessors);
    }

    snapshots.sort_by_key(|snapshot| snapshot.id);

    Ok(snapshots)
}

/// Decodes a dump in the given format into processor snapshots.
///
/// Identities are derived from the decoded stores exactly as they would be
/// from live hardware. Decoding an input with no usable data at all is the
/// same error as a machine with no processors.
pub fn enumerate_file(text: &str, format: DumpFormat) -> crate::Result<DecodeOutcome> {
    let outcome = codec::decode(text, format);

    if outcome.snapshots.is_empty() {
        return Err(Error::NoProcessors);
    }

    Ok(outcome)
}

/// Encodes the snapshots into the given dump format.
#[must_use]
pub fn print_dump(snapshots: &[ProcessorSnapshot], format: DumpFormat) -> String {
    codec::encode(snapshots, format)
}

/// Picks one processor by id from the snapshots.
pub fn select_processor(
    snapshots: &[ProcessorSnapshot],
    id: ProcessorId,
) -> crate::Result<&ProcessorSnapshot> {
    snapshots
        .iter()
        .find(|snapshot| snapshot.id == id)
        .ok_or(Error::UnknownProcessor { id })
}
