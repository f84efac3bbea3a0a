//! Platform Abstraction Layer (PAL). Everything that touches the operating
//! system or the hardware instruction goes through here, so the rest of the
//! crate can be exercised against mocks.

mod abstractions;
pub(crate) use abstractions::*;

mod facade;
pub(crate) use facade::*;

#[cfg(all(target_os = "linux", not(miri)))]
mod linux;
#[cfg(all(target_os = "linux", not(miri)))]
pub(crate) use linux::*;

// The fallback implementation serves unsupported platforms and Miri as the
// primary implementation. On Linux in test mode it is still compiled so PAL
// tests can compare against it, accessed via the explicit `fallback::` path.
#[cfg(any(test, miri, not(target_os = "linux")))]
pub(crate) mod fallback;

#[cfg(any(miri, not(target_os = "linux")))]
pub(crate) use fallback::*;

#[cfg(test)]
mod mocks;
#[cfg(test)]
pub(crate) use mocks::*;
