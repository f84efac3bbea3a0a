use std::fmt::{self, Display};

use leafspec::Register;

/// The four 32-bit values returned by one CPUID query. Immutable once queried.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Registers {
    /// The first result register.
    pub eax: u32,

    /// The second result register.
    pub ebx: u32,

    /// The third result register.
    pub ecx: u32,

    /// The fourth result register.
    pub edx: u32,
}

impl Registers {
    /// All four registers zero. This is what hardware typically returns for
    /// selectors it does not implement.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    /// Creates a register tuple from the four values in result order.
    #[must_use]
    pub const fn new(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
        Self { eax, ebx, ecx, edx }
    }

    /// Returns the named register.
    #[must_use]
    pub const fn get(&self, register: Register) -> u32 {
        match register {
            Register::Eax => self.eax,
            Register::Ebx => self.ebx,
            Register::Ecx => self.ecx,
            Register::Edx => self.edx,
        }
    }

    /// Whether all four registers are zero.
    #[must_use]
    pub const fn is_all_zero(&self) -> bool {
        self.eax == 0 && self.ebx == 0 && self.ecx == 0 && self.edx == 0
    }
}

impl Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eax=0x{:08x} ebx=0x{:08x} ecx=0x{:08x} edx=0x{:08x}",
            self.eax, self.ebx, self.ecx, self.edx
        )
    }
}

/// A mask covering the lowest `bits` bits.
///
/// Any width of 32 or more yields the all-bits mask rather than shifting out of range.
#[must_use]
pub const fn low_mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1_u32 << bits) - 1
    }
}

/// Extracts the inclusive bit range `hi..=lo` of a register value, shifted down to bit 0.
///
/// Raw register fields are always accessed through this function instead of bit-packed
/// struct layouts, so the extraction semantics do not depend on any ABI. Out-of-range
/// positions extract as zero; they never shift out of range.
#[must_use]
pub const fn bit_range(value: u32, hi: u32, lo: u32) -> u32 {
    if lo > hi || lo > 31 {
        return 0;
    }

    let hi = if hi > 31 { 31 } else { hi };

    (value >> lo) & low_mask(hi - lo + 1)
}

/// Whether the given bit of a register value is set. Out-of-range positions read as unset.
#[must_use]
pub const fn bit(value: u32, index: u32) -> bool {
    index <= 31 && (value >> index) & 1 == 1
}
