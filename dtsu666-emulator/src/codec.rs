pub use tokio_modbus::{Address, Quantity};

/// 16-bit value stored in Modbus register.
pub type Word = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordsCountError {
    pub expected: usize,
    pub actual: usize,
}

/// Decode a value from Big Endian-ordered `Word`s (most significant word first).
pub trait Decode: Sized {
    fn from_be_words(words: &[Word]) -> Result<Self, WordsCountError>;
}

macro_rules! impl_decode {
    ($num_type:ty) => {
        impl Decode for $num_type {
            fn from_be_words(words: &[Word]) -> Result<Self, WordsCountError> {
                let bytes = words
                    .iter()
                    .copied()
                    .flat_map(u16::to_be_bytes)
                    .collect::<Vec<u8>>();
                let actual = words.len();
                let array = bytes.try_into().or(Err(WordsCountError {
                    expected: std::mem::size_of::<$num_type>() / 2,
                    actual,
                }))?;
                Ok(<$num_type>::from_be_bytes(array))
            }
        }
    };
}

impl_decode!(u16);
impl_decode!(f32);

/// Encode a value into Big Endian-ordered `Word`s.
pub trait Encode {
    fn to_be_words(self) -> Vec<Word>;
}

macro_rules! impl_encode {
    ($num_type:ty) => {
        impl Encode for $num_type {
            fn to_be_words(self) -> Vec<Word> {
                self.to_be_bytes()
                    .chunks_exact(2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect()
            }
        }
    };
}

impl_encode!(u16);
impl_encode!(f32);

/// Split a float into `(high, low)` words. `high` lives at the register base address.
pub fn encode_f32(value: f32) -> (Word, Word) {
    let bits = value.to_bits();
    ((bits >> 16) as Word, bits as Word)
}

/// Inverse of [`encode_f32`].
pub fn decode_f32(high: Word, low: Word) -> f32 {
    f32::from_bits(((high as u32) << 16) | low as u32)
}

/// Narrow a value into a word register.
///
/// The fraction is truncated toward zero and the integer part wraps modulo 2^16,
/// so `-1.0` is stored as `0xFFFF` and `65536.0` as `0`. NaN is stored as `0`.
///
/// Wrapping only holds within the `i32` range: beyond ±2^31 the integer part saturates first,
/// so `3e9` is stored as `0xFFFF` and `-3e9` as `0`.
pub fn narrow_word(value: f32) -> Word {
    (value as i32) as Word
}

pub fn widen_word(word: Word) -> f32 {
    word as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_high_word_first() {
        let (high, low) = encode_f32(1.0);
        assert_eq!((high, low), (0x3F80, 0x0000));
        assert_eq!(1.0f32.to_be_words(), vec![0x3F80, 0x0000]);
    }

    #[test]
    fn test_f32_roundtrip_is_bit_exact() {
        for value in [
            0.0,
            -0.0,
            49.99,
            50.05,
            -1234.5,
            f32::MIN_POSITIVE,
            f32::MAX,
            f32::INFINITY,
            f32::from_bits(0x7FC0_0001),
        ] {
            let (high, low) = encode_f32(value);
            assert_eq!(decode_f32(high, low).to_bits(), value.to_bits());
        }
    }

    #[test]
    fn test_decode_trait_matches_decode_f32() {
        let words = 230.5f32.to_be_words();
        assert_eq!(f32::from_be_words(&words).unwrap(), decode_f32(words[0], words[1]));
        assert_eq!(
            f32::from_be_words(&words[..1]),
            Err(WordsCountError {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_narrow_word_truncates_and_wraps() {
        assert_eq!(narrow_word(204.0), 204);
        assert_eq!(narrow_word(701.9), 701);
        assert_eq!(narrow_word(-0.5), 0);
        assert_eq!(narrow_word(-1.0), 0xFFFF);
        assert_eq!(narrow_word(65536.0), 0);
        assert_eq!(narrow_word(65537.0), 1);
        assert_eq!(narrow_word(f32::NAN), 0);
        assert_eq!(narrow_word(3e9), 0xFFFF);
        assert_eq!(narrow_word(-3e9), 0);
        assert_eq!(widen_word(701), 701.0);
    }
}
