use std::thread;

use crate::pal::Platform;
use crate::{Leaf, ProcessorId, Registers, Subleaf};

/// Platform for operating systems without a dedicated implementation (and
/// for Miri, which cannot execute the real syscalls or the instruction).
///
/// Processor ids are synthesized from the runtime's parallelism, pinning is a
/// no-op, and the query executes the instruction when the architecture has it.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform;

#[cfg_attr(
    all(target_os = "linux", not(miri)),
    expect(dead_code, reason = "on supported platforms this only backs PAL comparison tests")
)]
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

impl Platform for BuildTargetPlatform {
    fn active_processor_ids(&self) -> Vec<ProcessorId> {
        let count = thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1);

        (0..u32::try_from(count).unwrap_or(u32::MAX)).collect()
    }

    fn pin_current_thread_to(&self, _processor: ProcessorId) {
        // Without affinity control the queries still run, they just observe
        // whichever processor the scheduler picked.
    }

    #[cfg(all(target_arch = "x86_64", not(miri)))]
    fn query_current(&self, leaf: Leaf, subleaf: Subleaf) -> Registers {
        // SAFETY: The instruction exists on every x86_64 processor and has no
        // preconditions beyond that.
        let result = unsafe { core::arch::x86_64::__cpuid_count(leaf, subleaf) };

        Registers::new(result.eax, result.ebx, result.ecx, result.edx)
    }

    #[cfg(not(all(target_arch = "x86_64", not(miri))))]
    fn query_current(&self, _leaf: Leaf, _subleaf: Subleaf) -> Registers {
        Registers::ZERO
    }
}
