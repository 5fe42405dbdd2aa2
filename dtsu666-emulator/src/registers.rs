use std::collections::HashMap;

use tokio_modbus::ExceptionCode;

use crate::catalog::{Catalog, RegisterDescriptor, RegisterKind};
use crate::codec::{narrow_word, Address, Encode, Quantity, Word};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Raw holding register image of a meter, addressed word by word.
///
/// Registers are allocated once from a [`Catalog`] and the set of addresses never changes afterwards.
pub struct Registers(HashMap<Address, Word>);

impl Registers {
    /// Allocate every catalog register and install its default value.
    pub fn allocate(catalog: &Catalog) -> Self {
        let capacity = catalog.iter().map(|d| d.kind.word_size() as usize).sum();
        let mut registers = Self(HashMap::with_capacity(capacity));
        for descriptor in catalog {
            for offset in 0..descriptor.kind.word_size() {
                registers.0.insert(descriptor.address + offset, 0);
            }
            registers.store(descriptor, descriptor.default_value);
        }
        registers
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.0.contains_key(&addr)
    }

    pub fn get(&self, addr: Address) -> Option<Word> {
        self.0.get(&addr).copied()
    }

    /// Overwrite an allocated register. Returns `false` if `addr` is not part of the image.
    pub fn set(&mut self, addr: Address, word: Word) -> bool {
        match self.0.get_mut(&addr) {
            Some(r) => {
                *r = word;
                true
            }
            None => false,
        }
    }

    /// Encode `value` according to the descriptor kind and store it at the descriptor address.
    pub fn store(&mut self, descriptor: &RegisterDescriptor, value: f32) {
        let words = match descriptor.kind {
            RegisterKind::Word => narrow_word(value).to_be_words(),
            RegisterKind::Float => value.to_be_words(),
        };
        for (offset, word) in (0..).zip(words) {
            self.set(descriptor.address + offset, word);
        }
    }

    /// Raw words backing `descriptor`.
    pub fn words(&self, descriptor: &RegisterDescriptor) -> Option<Vec<Word>> {
        (0..descriptor.kind.word_size())
            .map(|offset| self.get(descriptor.address + offset))
            .collect()
    }

    /// Read `cnt` consecutive registers starting at `addr`.
    pub fn read(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>, ExceptionCode> {
        let mut response_values = Vec::with_capacity(cnt.into());
        for i in 0..cnt {
            let reg_addr = addr
                .checked_add(i)
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            match self.0.get(&reg_addr) {
                Some(r) => response_values.push(*r),
                None => {
                    tracing::debug!("no register at address 0x{reg_addr:04x}");
                    return Err(ExceptionCode::IllegalDataAddress);
                }
            }
        }

        Ok(response_values)
    }

    /// Write `words` into existing consecutive registers starting at `addr`.
    ///
    /// Nothing is written unless every target register exists.
    pub fn write(&mut self, addr: Address, words: &[Word]) -> Result<(), ExceptionCode> {
        let all_present = (0..words.len()).all(|i| {
            Address::try_from(i)
                .ok()
                .and_then(|i| addr.checked_add(i))
                .is_some_and(|reg_addr| self.0.contains_key(&reg_addr))
        });
        if !all_present {
            tracing::debug!(
                "block of {} registers at 0x{addr:04x} is not part of the image",
                words.len()
            );
            return Err(ExceptionCode::IllegalDataAddress);
        }
        for (i, value) in words.iter().enumerate() {
            self.set(addr + i as Address, *value);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_f32;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            RegisterDescriptor::word(0x0000, "REV.", "Software version", 204.0),
            RegisterDescriptor::word(0x0001, "UCode", "Programming code", 701.0),
            RegisterDescriptor::float(0x2044, "Freq", "Frequency", 49.99),
        ])
        .unwrap()
    }

    #[test]
    fn test_allocate_installs_defaults() {
        let registers = Registers::allocate(&catalog());
        assert_eq!(registers.len(), 4);
        assert_eq!(registers.get(0x0000), Some(204));
        assert_eq!(registers.get(0x0001), Some(701));
        let words = registers.read(0x2044, 2).unwrap();
        assert_eq!(decode_f32(words[0], words[1]), 49.99);
        assert_eq!(registers.get(0x2046), None);
    }

    #[test]
    fn test_read_rejects_unallocated_range() {
        let registers = Registers::allocate(&catalog());
        assert_eq!(registers.read(0x0000, 2).unwrap(), vec![204, 701]);
        assert_eq!(
            registers.read(0x0001, 2),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            registers.read(0xFFFF, 2),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let mut registers = Registers::allocate(&catalog());
        assert_eq!(
            registers.write(0x0000, &[1, 2, 3]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(registers.get(0x0000), Some(204));

        registers.write(0x0000, &[1, 2]).unwrap();
        assert_eq!(registers.read(0x0000, 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_set_never_grows_the_image() {
        let mut registers = Registers::allocate(&catalog());
        assert!(!registers.set(0x9999, 7));
        assert!(!registers.contains(0x9999));
        assert_eq!(registers.len(), 4);
    }

    #[test]
    fn test_store_and_words_follow_kind() {
        let catalog = catalog();
        let mut registers = Registers::allocate(&catalog);
        let version = catalog.find(0x0000).unwrap();
        let frequency = catalog.find(0x2044).unwrap();

        registers.store(version, 70000.7);
        assert_eq!(registers.words(version), Some(vec![4464]));
        registers.store(frequency, 1.0);
        assert_eq!(registers.words(frequency), Some(vec![0x3F80, 0x0000]));
        assert_eq!(frequency.kind.decode(&registers.words(frequency).unwrap()), Some(1.0));
        assert_eq!(registers.get(0x0001), Some(701));
    }
}
