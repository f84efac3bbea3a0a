use std::fmt::Debug;

use crate::{Leaf, ProcessorId, Registers, Subleaf};

/// The operations the crate needs from the platform: which processors exist,
/// the ability to pin the current thread onto one of them, and the hardware
/// query itself.
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// The ids of all processors currently available to this process. Ids are
    /// not guaranteed to be contiguous or to start from zero.
    fn active_processor_ids(&self) -> Vec<ProcessorId>;

    /// Restricts the current thread to the given processor, so that
    /// subsequent queries observe that processor.
    fn pin_current_thread_to(&self, processor: ProcessorId);

    /// Executes one hardware query on whichever processor the current thread
    /// runs on. On targets without the instruction this answers all-zero.
    fn query_current(&self, leaf: Leaf, subleaf: Subleaf) -> Registers;
}
