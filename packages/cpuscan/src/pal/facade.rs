#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPlatform;
use crate::pal::{Platform, BUILD_TARGET_PLATFORM, BuildTargetPlatform};
use crate::{Leaf, ProcessorId, Registers, Subleaf};

/// Routes platform calls to the build target's implementation or, in tests,
/// to a mock.
#[derive(Clone, Debug)]
pub(crate) enum PlatformFacade {
    Real(&'static BuildTargetPlatform),

    #[cfg(test)]
    Mock(Arc<MockPlatform>),
}

impl PlatformFacade {
    pub(crate) fn real() -> Self {
        Self::Real(&BUILD_TARGET_PLATFORM)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPlatform) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Platform for PlatformFacade {
    fn active_processor_ids(&self) -> Vec<ProcessorId> {
        match self {
            Self::Real(platform) => platform.active_processor_ids(),
            #[cfg(test)]
            Self::Mock(platform) => platform.active_processor_ids(),
        }
    }

    fn pin_current_thread_to(&self, processor: ProcessorId) {
        match self {
            Self::Real(platform) => platform.pin_current_thread_to(processor),
            #[cfg(test)]
            Self::Mock(platform) => platform.pin_current_thread_to(processor),
        }
    }

    fn query_current(&self, leaf: Leaf, subleaf: Subleaf) -> Registers {
        match self {
            Self::Real(platform) => platform.query_current(leaf, subleaf),
            #[cfg(test)]
            Self::Mock(platform) => platform.query_current(leaf, subleaf),
        }
    }
}
