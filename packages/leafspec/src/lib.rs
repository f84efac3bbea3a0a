//! Utilities for parsing the textual selector notation used to reference a single CPUID
//! value: a leaf, an optional subleaf, one of the four result registers and, optionally,
//! a named feature flag or an explicit bit range within that register.
//!
//! Example selector string: `0x7:ebx.sgx` or `(EAX=0x7, ECX=0):ebx[2]`
//!
//! # Format
//!
//! A selector string has the shape `SELECTOR:REGISTER[FIELD]` where:
//!
//! * `SELECTOR` identifies the leaf and subleaf, in either of two equivalent forms:
//!   * dotted: `LEAF` or `LEAF.SUBLEAF` (e.g. `0x14.1`); an omitted subleaf means 0
//!   * parenthesized, patterned after vendor documentation: `(EAX=LEAF, ECX=SUBLEAF)`,
//!     where the `ECX=` part is optional
//! * `REGISTER` is one of `eax`, `ebx`, `ecx` or `edx`, case-insensitive
//! * `FIELD` is optional and selects part of the register, in any of these equivalent
//!   forms:
//!   * a named flag: `.avx2` (resolved against a feature description table by the caller)
//!   * a single bit: `[5]`, `(5)` or `[bit 5]`
//!   * a bit range, high to low: `[12:5]`
//!
//! All integers accept a `0x` prefix for hexadecimal and are otherwise decimal.
//! Flag names are case-insensitive and normalized to lowercase.
//!
//! Parsing any of the equivalent surface forms of the same selector yields an identical
//! [`FlagSpec`], and the canonical form produced by [`FlagSpec`]'s `Display` parses back
//! to the same value.
//!
//! # Example
//!
//! ```
//! use leafspec::{Field, Register};
//!
//! let spec = leafspec::parse("(EAX=0x14, ECX=1):ECX[12:5]").unwrap();
//!
//! assert_eq!(spec.leaf, 0x14);
//! assert_eq!(spec.subleaf, 1);
//! assert_eq!(spec.register, Register::Ecx);
//! assert_eq!(spec.field, Field::Bits { hi: 12, lo: 5 });
//!
//! // The canonical form round-trips.
//! assert_eq!(leafspec::parse(&spec.to_string()).unwrap(), spec);
//! ```

mod error;
mod parse;

use std::fmt::{self, Display};

pub use error::*;
pub use parse::*;

/// One of the four registers returned by a CPUID query, in result order.
///
/// Mirrors the fixed four-register result of the hardware instruction.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Register {
    /// The first result register.
    Eax,
    /// The second result register.
    Ebx,
    /// The third result register, which also carries the subleaf on input.
    Ecx,
    /// The fourth result register.
    Edx,
}

impl Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eax => "eax",
            Self::Ebx => "ebx",
            Self::Ecx => "ecx",
            Self::Edx => "edx",
        })
    }
}

/// The part of the register a [`FlagSpec`] selects.
///
/// The notation defines exactly these three field forms.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Field {
    /// The entire 32-bit register.
    Whole,

    /// A flag or field referenced by name, to be resolved against a feature
    /// description table for the selected leaf/subleaf/register.
    Named(String),

    /// An explicit bit range, `hi..=lo`, both inclusive. A single bit is
    /// represented as `hi == lo`.
    Bits {
        /// Highest bit of the range, inclusive. At most 31.
        hi: u32,

        /// Lowest bit of the range, inclusive.
        lo: u32,
    },
}

/// A parsed selector referencing one CPUID value.
///
/// Produced by [`parse()`]; evaluated against a result store by the caller.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FlagSpec {
    /// The leaf to select.
    pub leaf: u32,

    /// The subleaf to select. Zero when the notation omitted it.
    pub subleaf: u32,

    /// The result register to select.
    pub register: Register,

    /// The part of the register to extract.
    pub field: Field,
}

impl Display for FlagSpec {
    /// Emits the canonical dotted form, e.g. `0x14.0x1:ecx[12:5]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}.{:#x}:{}", self.leaf, self.subleaf, self.register)?;

        match &self.field {
            Field::Whole => Ok(()),
            Field::Named(name) => write!(f, ".{name}"),
            Field::Bits { hi, lo } if hi == lo => write!(f, "[{hi}]"),
            Field::Bits { hi, lo } => write!(f, "[{hi}:{lo}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_is_stable() {
        let spec = FlagSpec {
            leaf: 0x14,
            subleaf: 1,
            register: Register::Ecx,
            field: Field::Bits { hi: 12, lo: 5 },
        };

        assert_eq!(spec.to_string(), "0x14.0x1:ecx[12:5]");

        let single_bit = FlagSpec {
            field: Field::Bits { hi: 5, lo: 5 },
            ..spec.clone()
        };
        assert_eq!(single_bit.to_string(), "0x14.0x1:ecx[5]");

        let named = FlagSpec {
            field: Field::Named("sgx".to_string()),
            ..spec.clone()
        };
        assert_eq!(named.to_string(), "0x14.0x1:ecx.sgx");

        let whole = FlagSpec {
            field: Field::Whole,
            ..spec
        };
        assert_eq!(whole.to_string(), "0x14.0x1:ecx");
    }
}
