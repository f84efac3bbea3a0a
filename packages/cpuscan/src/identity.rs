use std::fmt::{self, Display};

use crate::registers::{bit_range, Registers};
use crate::{Leaf, ResultStore, VendorMask, HYPERVISOR_BASE, STANDARD_BASE};

/// Offset above [`HYPERVISOR_BASE`] at which some hypervisors expose a second
/// signature block (e.g. KVM underneath Hyper-V emulation).
pub(crate) const SECONDARY_HYPERVISOR_OFFSET: Leaf = 0x100;

/// Who made this processor and which one it is, decoded from the raw results.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessorIdentity {
    /// Every vendor signature recognized in the results. A virtualized
    /// processor carries both a silicon and a hypervisor vendor.
    pub vendors: VendorMask,

    /// The raw 12-character silicon vendor string, if leaf 0 was recorded.
    pub vendor_string: Option<String>,

    /// Display family, with the extended family adjustment already applied.
    pub family: u32,

    /// Display model, with the extended model adjustment already applied.
    pub model: u32,

    /// Stepping revision.
    pub stepping: u32,

    /// The widest APIC identifier available in the results, or `None` when
    /// none of the leaves that carry one was recorded.
    pub full_apic_id: Option<u32>,
}

impl ProcessorIdentity {
    /// Decodes the identity from the raw results of one processor.
    ///
    /// Missing leaves degrade gracefully: a store without leaf 1 yields zero
    /// family/model/stepping, a store without any APIC-carrying leaf yields
    /// no APIC identifier.
    #[must_use]
    pub fn from_store(store: &ResultStore) -> Self {
        let vendors = vendors(store);

        let vendor_string = store
            .get(STANDARD_BASE, 0)
            .map(|registers| signature_string(registers.ebx, registers.edx, registers.ecx));

        let (family, model, stepping) = store
            .get(0x1, 0)
            .map_or((0, 0, 0), |registers| decode_signature(registers.eax));

        Self {
            vendors,
            vendor_string,
            family,
            model,
            stepping,
            full_apic_id: full_apic_id(store),
        }
    }
}

impl Display for ProcessorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} family 0x{:x} model 0x{:x} stepping 0x{:x}",
            self.vendor_string.as_deref().unwrap_or("(no vendor)"),
            self.family,
            self.model,
            self.stepping
        )?;

        if let Some(apic_id) = self.full_apic_id {
            write!(f, " apic 0x{apic_id:x}")?;
        }

        if !self.vendors.is_empty() {
            write!(f, " [{}]", self.vendors)?;
        }

        Ok(())
    }
}

/// Recognizes every vendor signature present in the results.
///
/// The silicon signature lives in leaf 0 with the registers read in
/// EBX, EDX, ECX order; hypervisor signatures live at the hypervisor
/// region base (and possibly one secondary block above it) with the
/// registers read in EBX, ECX, EDX order.
pub(crate) fn vendors(store: &ResultStore) -> VendorMask {
    let mut mask = VendorMask::NONE;

    if let Some(registers) = store.get(STANDARD_BASE, 0) {
        mask |= silicon_vendor(&signature_string(registers.ebx, registers.edx, registers.ecx));
    }

    for base in [
        HYPERVISOR_BASE,
        HYPERVISOR_BASE + SECONDARY_HYPERVISOR_OFFSET,
    ] {
        if let Some(registers) = store.get(base, 0) {
            mask |= hypervisor_vendor(&signature_string(
                registers.ebx,
                registers.ecx,
                registers.edx,
            ));
        }
    }

    mask
}

fn signature_string(first: u32, second: u32, third: u32) -> String {
    let mut bytes = Vec::with_capacity(12);
    bytes.extend_from_slice(&first.to_le_bytes());
    bytes.extend_from_slice(&second.to_le_bytes());
    bytes.extend_from_slice(&third.to_le_bytes());

    // Non-ASCII garbage renders as replacement characters, which no signature
    // match will accept.
    String::from_utf8_lossy(&bytes).into_owned()
}

fn silicon_vendor(signature: &str) -> VendorMask {
    match signature {
        "GenuineIntel" => VendorMask::INTEL,
        "AuthenticAMD" => VendorMask::AMD,
        "HygonGenuine" => VendorMask::HYGON,
        "CentaurHauls" => VendorMask::CENTAUR,
        _ => VendorMask::NONE,
    }
}

fn hypervisor_vendor(signature: &str) -> VendorMask {
    // The KVM signature only fills 9 of the 12 characters; the tail bytes
    // are unspecified.
    if signature.starts_with("KVMKVMKVM") {
        return VendorMask::KVM;
    }

    match signature {
        "Microsoft Hv" => VendorMask::HYPERV,
        "XenVMMXenVMM" => VendorMask::XEN,
        "VMwareVMware" => VendorMask::VMWARE,
        _ => VendorMask::NONE,
    }
}

/// Applies the extended family/model arithmetic to the leaf 1 EAX signature.
fn decode_signature(eax: u32) -> (u32, u32, u32) {
    let stepping = bit_range(eax, 3, 0);
    let base_model = bit_range(eax, 7, 4);
    let base_family = bit_range(eax, 11, 8);
    let extended_model = bit_range(eax, 19, 16);
    let extended_family = bit_range(eax, 27, 20);

    let family = if base_family == 0xf {
        base_family + extended_family
    } else {
        base_family
    };

    let model = if base_family == 0x6 || base_family == 0xf {
        (extended_model << 4) + base_model
    } else {
        base_model
    };

    (family, model, stepping)
}

/// Picks the widest APIC identifier the results carry: the full 32-bit value
/// from the v2 topology leaf, then the v1 topology leaf, then the legacy
/// 8-bit initial identifier from leaf 1.
pub(crate) fn full_apic_id(store: &ResultStore) -> Option<u32> {
    if let Some(registers) = store.get(0x1f, 0) {
        return Some(registers.edx);
    }

    if let Some(registers) = store.get(0xb, 0) {
        return Some(registers.edx);
    }

    store
        .get(0x1, 0)
        .map(|registers| bit_range(registers.ebx, 31, 24))
}

/// Whether the EAX value returned by a region's base leaf is a plausible
/// maximum-leaf answer for that region. Hardware that does not implement a
/// region echoes garbage or zeroes there.
pub(crate) fn is_valid_region_max(base: Leaf, eax: u32) -> bool {
    eax >= base && eax - base <= crate::engine::REGION_SPAN
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::EXTENDED_BASE;

    // "GenuineIntel" packed into EBX, EDX, ECX.
    pub(crate) const GENUINE_INTEL: (u32, u32, u32) = (0x756e_6547, 0x4965_6e69, 0x6c65_746e);
    // "AuthenticAMD" packed into EBX, EDX, ECX.
    pub(crate) const AUTHENTIC_AMD: (u32, u32, u32) = (0x6874_7541, 0x6974_6e65, 0x444d_4163);
    // "KVMKVMKVM\0\0\0" packed into EBX, ECX, EDX.
    pub(crate) const KVM_SIGNATURE: (u32, u32, u32) = (0x4b4d_564b, 0x564b_4d56, 0x0000_004d);

    fn intel_store() -> ResultStore {
        let mut store = ResultStore::new();
        let (ebx, edx, ecx) = GENUINE_INTEL;
        store.insert(0x0, 0, Registers::new(0xb, ebx, ecx, edx));
        store
    }

    #[test]
    fn recognizes_silicon_vendors() {
        let store = intel_store();
        assert_eq!(vendors(&store), VendorMask::INTEL);

        let mut store = ResultStore::new();
        let (ebx, edx, ecx) = AUTHENTIC_AMD;
        store.insert(0x0, 0, Registers::new(0x10, ebx, ecx, edx));
        assert_eq!(vendors(&store), VendorMask::AMD);

        let identity = ProcessorIdentity::from_store(&store);
        assert_eq!(identity.vendor_string.as_deref(), Some("AuthenticAMD"));
    }

    #[test]
    fn recognizes_hypervisor_alongside_silicon() {
        let mut store = intel_store();
        let (ebx, ecx, edx) = KVM_SIGNATURE;
        store.insert(HYPERVISOR_BASE, 0, Registers::new(HYPERVISOR_BASE, ebx, ecx, edx));

        let mask = vendors(&store);
        assert!(mask.intersects(VendorMask::INTEL));
        assert!(mask.intersects(VendorMask::KVM));
    }

    #[test]
    fn recognizes_secondary_hypervisor_block() {
        let mut store = intel_store();
        let (ebx, ecx, edx) = KVM_SIGNATURE;
        store.insert(
            HYPERVISOR_BASE + SECONDARY_HYPERVISOR_OFFSET,
            0,
            Registers::new(0, ebx, ecx, edx),
        );

        assert!(vendors(&store).intersects(VendorMask::KVM));
    }

    #[test]
    fn unknown_signature_is_empty() {
        let mut store = ResultStore::new();
        store.insert(0x0, 0, Registers::new(0x1, 0x1234, 0x5678, 0x9abc));
        assert_eq!(vendors(&store), VendorMask::NONE);
    }

    #[test]
    fn extended_family_and_model_arithmetic() {
        // Family 0x6 combines the extended model; base family stays.
        let (family, model, stepping) = decode_signature(0x000a_0655);
        assert_eq!(family, 0x6);
        assert_eq!(model, 0xa5);
        assert_eq!(stepping, 0x5);

        // Family 0xf adds the extended family and combines the extended model.
        let (family, model, _) = decode_signature(0x0012_0f31);
        assert_eq!(family, 0xf + 0x1);
        assert_eq!(model, 0x23);

        // Other families ignore both extended fields.
        let (family, model, _) = decode_signature(0x00a1_0542);
        assert_eq!(family, 0x5);
        assert_eq!(model, 0x4);
    }

    #[test]
    fn apic_id_prefers_widest_source() {
        let mut store = ResultStore::new();
        store.insert(0x1, 0, Registers::new(0, 0x0700_0000, 0, 0));
        assert_eq!(full_apic_id(&store), Some(0x07));

        store.insert(0xb, 0, Registers::new(1, 2, 0x100, 0x1234));
        assert_eq!(full_apic_id(&store), Some(0x1234));

        store.insert(0x1f, 0, Registers::new(1, 2, 0x100, 0xdead_beef));
        assert_eq!(full_apic_id(&store), Some(0xdead_beef));

        assert_eq!(full_apic_id(&ResultStore::new()), None);
    }

    #[test]
    fn region_max_validation() {
        assert!(is_valid_region_max(EXTENDED_BASE, EXTENDED_BASE + 8));
        assert!(is_valid_region_max(EXTENDED_BASE, EXTENDED_BASE));
        assert!(!is_valid_region_max(EXTENDED_BASE, 0));
        assert!(!is_valid_region_max(EXTENDED_BASE, EXTENDED_BASE + 0x1_0000));
    }
}
