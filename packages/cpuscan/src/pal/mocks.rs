#![expect(clippy::same_name_method, reason = "mock magic")]

use mockall::mock;

use crate::pal::Platform;
use crate::{Leaf, ProcessorId, Registers, Subleaf};

// Mockall cannot implement a foreign-looking trait with the lifetimes and
// bounds we want directly, so we mock equivalent inherent methods and forward
// the trait to them.
mock! {
    #[derive(Debug)]
    pub Platform {
        pub fn active_processor_ids(&self) -> Vec<ProcessorId>;
        pub fn pin_current_thread_to(&self, processor: ProcessorId);
        pub fn query_current(&self, leaf: Leaf, subleaf: Subleaf) -> Registers;
    }
}

impl Platform for MockPlatform {
    fn active_processor_ids(&self) -> Vec<ProcessorId> {
        self.active_processor_ids()
    }

    fn pin_current_thread_to(&self, processor: ProcessorId) {
        self.pin_current_thread_to(processor);
    }

    fn query_current(&self, leaf: Leaf, subleaf: Subleaf) -> Registers {
        self.query_current(leaf, subleaf)
    }
}
