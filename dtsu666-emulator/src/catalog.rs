use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use thiserror::Error;

use crate::codec::{widen_word, Address, Decode, Quantity, Word};

/// Address that terminates a catalog. Never backed by a register.
pub const SENTINEL_ADDRESS: Address = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// Unsigned 16-bit value in a single register.
    Word,
    /// IEEE-754 float in two registers, high word at the base address.
    Float,
}

impl RegisterKind {
    pub fn word_size(&self) -> Quantity {
        match self {
            RegisterKind::Word => 1,
            RegisterKind::Float => 2,
        }
    }

    /// Interpret raw register words as a value of this kind.
    pub fn decode(&self, words: &[Word]) -> Option<f32> {
        let words = words.get(..self.word_size() as usize)?;
        match self {
            RegisterKind::Word => u16::from_be_words(words).ok().map(widen_word),
            RegisterKind::Float => f32::from_be_words(words).ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Single entry of a meter register map.
pub struct RegisterDescriptor {
    pub address: Address,
    pub kind: RegisterKind,
    pub code: &'static str,
    pub name: &'static str,
    pub default_value: f32,
}

impl RegisterDescriptor {
    pub const fn word(
        address: Address,
        code: &'static str,
        name: &'static str,
        default_value: f32,
    ) -> Self {
        Self {
            address,
            kind: RegisterKind::Word,
            code,
            name,
            default_value,
        }
    }

    pub const fn float(
        address: Address,
        code: &'static str,
        name: &'static str,
        default_value: f32,
    ) -> Self {
        Self {
            address,
            kind: RegisterKind::Float,
            code,
            name,
            default_value,
        }
    }

    /// First address after the registers this descriptor occupies.
    pub fn end(&self) -> u32 {
        self.address as u32 + self.kind.word_size() as u32
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("register 0x{address:04x} is not above the previous register 0x{previous:04x}")]
    NotAscending { previous: Address, address: Address },
    #[error("register 0x{address:04x} overlaps the register at 0x{previous:04x}")]
    Overlap { previous: Address, address: Address },
    #[error("register 0x{address:04x} reaches the sentinel address")]
    Sentinel { address: Address },
}

/// DTSU666 register map. See the DTSU666 user manual, section "Communication address table".
const DTSU666_REGISTERS: &[RegisterDescriptor] = &[
    RegisterDescriptor::word(0x0000, "REV.", "Software version", 204.0),
    RegisterDescriptor::word(0x0001, "UCode", "Programming code", 701.0),
    RegisterDescriptor::word(0x0002, "ClrE", "Power reset", 0.0),
    RegisterDescriptor::word(0x0003, "nET", "Network selection", 0.0),
    RegisterDescriptor::word(0x0006, "Ct", "Current transformer rate", 1.0),
    RegisterDescriptor::word(0x0007, "Pt", "Voltage transformer rate", 10.0),
    RegisterDescriptor::word(0x000A, "Disp", "Rotating Display Time", 0.0),
    RegisterDescriptor::word(0x000C, "Endian", "Reserved", 0.0),
    RegisterDescriptor::word(0x002C, "Prot", "Protocol stopbits", 3.0),
    RegisterDescriptor::word(0x002D, "bAud", "Communication baudrate", 3.0),
    RegisterDescriptor::word(0x002E, "Addr", "Communication address", 1.0),
    // Energy
    RegisterDescriptor::float(0x101E, "ImpEp", "(Current) positive total active energy", 0.0),
    RegisterDescriptor::float(0x1028, "ExpEp", "(Current) negative total active energy", 0.0),
    // Electricity
    RegisterDescriptor::float(0x2000, "Uab", "Three phase line voltage", 0.0),
    RegisterDescriptor::float(0x2002, "Ubc", "Three phase line voltage", 0.0),
    RegisterDescriptor::float(0x2004, "Uca", "Three phase line voltage", 0.0),
    RegisterDescriptor::float(0x2006, "Ua", "Three phase phase voltage", 0.0),
    RegisterDescriptor::float(0x2008, "Ub", "Three phase phase voltage", 0.0),
    RegisterDescriptor::float(0x200A, "Uc", "Three phase phase voltage", 0.0),
    RegisterDescriptor::float(0x200C, "Ia", "Three phase current", 0.0),
    RegisterDescriptor::float(0x200E, "Ib", "Three phase current", 0.0),
    RegisterDescriptor::float(0x2010, "Ic", "Three phase current", 0.0),
    RegisterDescriptor::float(0x2012, "Pt", "Combined active power", 0.0),
    RegisterDescriptor::float(0x2014, "Pa", "A phase active power", 0.0),
    RegisterDescriptor::float(0x2016, "Pb", "B phase active power", 0.0),
    RegisterDescriptor::float(0x2018, "Pc", "C phase active power", 0.0),
    RegisterDescriptor::float(0x201A, "Qt", "Combined reactive power", 0.0),
    RegisterDescriptor::float(0x201C, "Qa", "A phase reactive power", 0.0),
    RegisterDescriptor::float(0x201E, "Qb", "B phase reactive power", 0.0),
    RegisterDescriptor::float(0x2020, "Qc", "C phase reactive power", 0.0),
    RegisterDescriptor::float(0x202A, "PFt", "Combined power factor", 0.0),
    RegisterDescriptor::float(0x202C, "PFa", "A phase power factor", 0.0),
    RegisterDescriptor::float(0x202E, "PFb", "B phase power factor", 0.0),
    RegisterDescriptor::float(0x2030, "PFc", "C phase power factor", 0.0),
    // Frequency in 0.01 Hz
    RegisterDescriptor::float(0x2044, "Freq", "Frequency", 4999.0),
];

static DTSU666: LazyLock<Arc<Catalog>> = LazyLock::new(|| {
    Arc::new(Catalog {
        descriptors: Cow::Borrowed(DTSU666_REGISTERS),
    })
});

#[derive(Debug, Clone, PartialEq)]
/// Ordered, non-overlapping register map. The sentinel is implicit.
pub struct Catalog {
    descriptors: Cow<'static, [RegisterDescriptor]>,
}

impl Catalog {
    /// Built-in DTSU666 register map.
    pub fn dtsu666() -> Arc<Catalog> {
        DTSU666.clone()
    }

    pub fn new(
        descriptors: impl Into<Cow<'static, [RegisterDescriptor]>>,
    ) -> Result<Self, CatalogError> {
        let descriptors = descriptors.into();
        Self::validate(&descriptors)?;
        Ok(Self { descriptors })
    }

    fn validate(descriptors: &[RegisterDescriptor]) -> Result<(), CatalogError> {
        for pair in descriptors.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if next.address <= previous.address {
                return Err(CatalogError::NotAscending {
                    previous: previous.address,
                    address: next.address,
                });
            }
            if (next.address as u32) < previous.end() {
                return Err(CatalogError::Overlap {
                    previous: previous.address,
                    address: next.address,
                });
            }
        }
        if let Some(last) = descriptors.last() {
            if last.end() > SENTINEL_ADDRESS as u32 {
                return Err(CatalogError::Sentinel {
                    address: last.address,
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RegisterDescriptor> {
        self.descriptors.iter()
    }

    pub fn get(&self, index: usize) -> Option<&RegisterDescriptor> {
        self.descriptors.get(index)
    }

    /// Address of the entry at `index`, or the sentinel past the end.
    pub fn address_at(&self, index: usize) -> Address {
        self.get(index).map_or(SENTINEL_ADDRESS, |d| d.address)
    }

    /// Look up the descriptor registered at exactly `address`.
    pub fn find(&self, address: Address) -> Option<&RegisterDescriptor> {
        self.iter().find(|d| d.address == address)
    }

    pub fn position(&self, address: Address) -> Option<usize> {
        self.iter().position(|d| d.address == address)
    }

    /// Index of the first entry at or above `address`.
    pub fn position_from(&self, address: Address) -> usize {
        self.iter()
            .position(|d| d.address >= address)
            .unwrap_or(self.len())
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a RegisterDescriptor;
    type IntoIter = std::slice::Iter<'a, RegisterDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
