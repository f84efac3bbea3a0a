use std::fmt::Debug;
#[cfg(test)]
use std::sync::Arc;
use std::{io, mem, thread};

use crate::pal::Platform;
use crate::{Leaf, ProcessorId, Registers, Subleaf};

/// The kernel publishes the currently online processors here.
const ONLINE_PROCESSORS_PATH: &str = "/sys/devices/system/cpu/online";

/// Bindings for FFI calls and filesystem probes into the operating system.
///
/// All PAL calls with external effects go through this trait, enabling them
/// to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    /// sched_setaffinity() for the current thread, restricted to one processor.
    fn sched_setaffinity_current(&self, processor: ProcessorId) -> Result<(), io::Error>;

    /// One CPUID query on the current processor.
    fn cpuid_count(&self, leaf: Leaf, subleaf: Subleaf) -> Registers;

    /// The contents of the kernel's online-processor list, when readable.
    fn get_online_processors_contents(&self) -> Option<String>;
}

/// Bindings that target the real operating system that the build is targeting.
///
/// You would only use different bindings in PAL unit tests that need to use
/// mock bindings.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

impl Bindings for BuildTargetBindings {
    fn sched_setaffinity_current(&self, processor: ProcessorId) -> Result<(), io::Error> {
        // SAFETY: All zeroes is a valid cpu_set_t.
        let mut cpuset: libc::cpu_set_t = unsafe { mem::zeroed() };

        // SAFETY: The set is a valid cpu_set_t and the index is in range for it.
        unsafe { libc::CPU_SET(processor as usize, &mut cpuset) };

        // 0 means current thread.
        // SAFETY: No safety requirements beyond passing valid arguments.
        let result =
            unsafe { libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &raw const cpuset) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn cpuid_count(&self, leaf: Leaf, subleaf: Subleaf) -> Registers {
        // SAFETY: The instruction exists on every x86_64 processor and has no
        // preconditions beyond that.
        let result = unsafe { core::arch::x86_64::__cpuid_count(leaf, subleaf) };

        Registers::new(result.eax, result.ebx, result.ecx, result.edx)
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn cpuid_count(&self, _leaf: Leaf, _subleaf: Subleaf) -> Registers {
        // No such instruction on this architecture. All-zero is the same
        // answer real hardware gives for unimplemented selectors.
        Registers::ZERO
    }

    fn get_online_processors_contents(&self) -> Option<String> {
        std::fs::read_to_string(ONLINE_PROCESSORS_PATH).ok()
    }
}

/// Routes binding calls to the real operating system or, in tests, to mocks.
#[derive(Clone, Debug)]
pub(crate) enum BindingsFacade {
    Real(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn real() -> Self {
        Self::Real(&BuildTargetBindings)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Bindings for BindingsFacade {
    fn sched_setaffinity_current(&self, processor: ProcessorId) -> Result<(), io::Error> {
        match self {
            Self::Real(bindings) => bindings.sched_setaffinity_current(processor),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.sched_setaffinity_current(processor),
        }
    }

    fn cpuid_count(&self, leaf: Leaf, subleaf: Subleaf) -> Registers {
        match self {
            Self::Real(bindings) => bindings.cpuid_count(leaf, subleaf),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.cpuid_count(leaf, subleaf),
        }
    }

    fn get_online_processors_contents(&self) -> Option<String> {
        match self {
            Self::Real(bindings) => bindings.get_online_processors_contents(),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.get_online_processors_contents(),
        }
    }
}

/// The platform that matches the target operating system of the build.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform {
    bindings: BindingsFacade,
}

pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform =
    BuildTargetPlatform::new(BindingsFacade::real());

impl BuildTargetPlatform {
    pub(crate) const fn new(bindings: BindingsFacade) -> Self {
        Self { bindings }
    }
}

impl Platform for BuildTargetPlatform {
    fn active_processor_ids(&self) -> Vec<ProcessorId> {
        if let Some(contents) = self.bindings.get_online_processors_contents() {
            return cpulist::parse(contents.trim())
                .expect("the kernel always publishes a valid processor list");
        }

        // Without the sysfs file (containers, exotic kernels) the best
        // available answer is the parallelism the runtime reports, which
        // implies processors 0..N.
        let count = thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1);

        (0..u32::try_from(count).unwrap_or(u32::MAX)).collect()
    }

    fn pin_current_thread_to(&self, processor: ProcessorId) {
        self.bindings
            .sched_setaffinity_current(processor)
            .expect("failed to configure thread affinity for a processor the kernel reported as online");
    }

    fn query_current(&self, leaf: Leaf, subleaf: Subleaf) -> Registers {
        self.bindings.cpuid_count(leaf, subleaf)
    }
}
