use std::fmt::{self, Display};
use std::ops::{BitOr, BitOrAssign};

/// Identifies a CPUID leaf: the primary selector of one hardware query point,
/// passed to the instruction in EAX.
pub type Leaf = u32;

/// Identifies a CPUID subleaf: the secondary selector of one hardware query point,
/// passed to the instruction in ECX.
pub type Subleaf = u32;

/// Identifies a specific logical processor.
///
/// This will match the numeric identifier used by standard tooling of the operating system.
///
/// It is important to highlight that the values used are not guaranteed to be sequential/contiguous
/// or to start from zero (aspects that are also not guaranteed by operating system tooling).
pub type ProcessorId = u32;

/// First leaf of the standard numeric region.
pub const STANDARD_BASE: Leaf = 0x0000_0000;

/// First leaf of the hypervisor-vendor-specific numeric region. Hypervisors may expose
/// additional signature blocks at fixed offsets above this base.
pub const HYPERVISOR_BASE: Leaf = 0x4000_0000;

/// First leaf of the extended numeric region.
pub const EXTENDED_BASE: Leaf = 0x8000_0000;

/// Classifies a processor by its reported vendor signatures.
///
/// This is a bitmask because a virtualized processor carries both a silicon vendor
/// and a hypervisor vendor at the same time.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct VendorMask(u32);

impl VendorMask {
    /// No vendor signature was recognized.
    pub const NONE: Self = Self(0);

    /// Silicon signed `GenuineIntel`.
    pub const INTEL: Self = Self(1 << 0);

    /// Silicon signed `AuthenticAMD`.
    pub const AMD: Self = Self(1 << 1);

    /// Silicon signed `HygonGenuine`.
    pub const HYGON: Self = Self(1 << 2);

    /// Silicon signed `CentaurHauls`.
    pub const CENTAUR: Self = Self(1 << 3);

    /// Hypervisor signed `KVMKVMKVM`.
    pub const KVM: Self = Self(1 << 8);

    /// Hypervisor signed `Microsoft Hv`.
    pub const HYPERV: Self = Self(1 << 9);

    /// Hypervisor signed `XenVMMXenVMM`.
    pub const XEN: Self = Self(1 << 10);

    /// Hypervisor signed `VMwareVMware`.
    pub const VMWARE: Self = Self(1 << 11);

    /// Every known silicon vendor.
    pub const ANY_SILICON: Self = Self(0x0000_00ff);

    /// Every known hypervisor vendor.
    pub const ANY_HYPERVISOR: Self = Self(0x0000_ff00);

    /// Every vendor. Descriptor table entries use this when a leaf is architectural.
    pub const ANY: Self = Self(u32::MAX);

    /// Whether any vendor bit is set in both masks.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no vendor signature was recognized.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for VendorMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for VendorMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for VendorMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(VendorMask, &str); 8] = [
            (VendorMask::INTEL, "intel"),
            (VendorMask::AMD, "amd"),
            (VendorMask::HYGON, "hygon"),
            (VendorMask::CENTAUR, "centaur"),
            (VendorMask::KVM, "kvm"),
            (VendorMask::HYPERV, "hyperv"),
            (VendorMask::XEN, "xen"),
            (VendorMask::VMWARE, "vmware"),
        ];

        if self.is_empty() {
            return f.write_str("unknown");
        }

        let mut first = true;

        for (mask, name) in NAMES {
            if self.intersects(mask) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_mask_combines() {
        let mask = VendorMask::INTEL | VendorMask::KVM;

        assert!(mask.intersects(VendorMask::INTEL));
        assert!(mask.intersects(VendorMask::ANY_SILICON));
        assert!(mask.intersects(VendorMask::ANY_HYPERVISOR));
        assert!(!mask.intersects(VendorMask::AMD));
        assert!(!VendorMask::NONE.intersects(VendorMask::ANY));

        assert_eq!(mask.to_string(), "intel+kvm");
        assert_eq!(VendorMask::NONE.to_string(), "unknown");
    }
}
