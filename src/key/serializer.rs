//! # Key Serializers
//!
//! A key serializer converts a typed application key into the fixed-width
//! byte form the storage protocol expects. Every serializer has a constant
//! `serialized_size`; `encode` must be handed a buffer of exactly that
//! length and fills all of it.
//!
//! Default codecs:
//! - `u32`, `i32`, `u64`, `i64`, `u128` via [`IntKeySerializer`] (little-endian)
//! - `uuid::Uuid` via [`UuidKeySerializer`] (the 16 raw bytes)
//!
//! Custom widths:
//! - [`PaddedKeySerializer`] truncates or zero-pads byte keys
//! - [`HashedKeySerializer`] maps string keys onto a truncated SHA-256 digest

use sha2::{Digest, Sha256};
use std::marker::PhantomData;
use uuid::Uuid;

use crate::error::{Error, KeyError};

/// Typed-key to fixed-width-bytes codec.
///
/// Implementations are stateless and shared between threads.
pub trait KeySerializer<K>: Send + Sync + 'static {
    /// Number of bytes every encoded key occupies.
    fn serialized_size(&self) -> usize;

    /// Write `key` into `buffer`.
    ///
    /// # Errors
    /// * `KeyError::WidthMismatch` if `buffer.len() != self.serialized_size()`
    fn encode(&self, key: &K, buffer: &mut [u8]) -> Result<(), KeyError>;

    /// Read a key back out of `buffer`.
    fn decode(&self, buffer: &[u8]) -> Result<K, KeyError>;
}

/// Key types with a built-in codec.
pub trait DefaultKeySerializer: Sized + 'static {
    type Serializer: KeySerializer<Self> + Default;
}

fn check_width(expected: usize, actual: usize) -> Result<(), KeyError> {
    if expected != actual {
        return Err(KeyError::WidthMismatch { expected, actual });
    }
    Ok(())
}

/// Little-endian codec for primitive integer keys.
pub struct IntKeySerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for IntKeySerializer<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for IntKeySerializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IntKeySerializer<{}>", std::any::type_name::<T>())
    }
}

macro_rules! int_key_serializer {
    ($($ty:ty),*) => {
        $(
            impl KeySerializer<$ty> for IntKeySerializer<$ty> {
                fn serialized_size(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }

                fn encode(&self, key: &$ty, buffer: &mut [u8]) -> Result<(), KeyError> {
                    check_width(std::mem::size_of::<$ty>(), buffer.len())?;
                    buffer.copy_from_slice(&key.to_le_bytes());
                    Ok(())
                }

                fn decode(&self, buffer: &[u8]) -> Result<$ty, KeyError> {
                    let bytes = buffer.try_into().map_err(|_| KeyError::WidthMismatch {
                        expected: std::mem::size_of::<$ty>(),
                        actual: buffer.len(),
                    })?;
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }

            impl DefaultKeySerializer for $ty {
                type Serializer = IntKeySerializer<$ty>;
            }
        )*
    };
}

int_key_serializer!(u32, i32, u64, i64, u128);

/// Codec for UUID keys; the key is its 16 raw bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeySerializer;

impl KeySerializer<Uuid> for UuidKeySerializer {
    fn serialized_size(&self) -> usize {
        16
    }

    fn encode(&self, key: &Uuid, buffer: &mut [u8]) -> Result<(), KeyError> {
        check_width(16, buffer.len())?;
        buffer.copy_from_slice(key.as_bytes());
        Ok(())
    }

    fn decode(&self, buffer: &[u8]) -> Result<Uuid, KeyError> {
        Uuid::from_slice(buffer).map_err(|e| KeyError::Decode(e.to_string()))
    }
}

impl DefaultKeySerializer for Uuid {
    type Serializer = UuidKeySerializer;
}

/// Fits arbitrary byte keys into `width` bytes.
///
/// Longer keys are truncated, shorter keys are padded with zeros. Decoding
/// returns the full padded width.
#[derive(Debug, Clone, Copy)]
pub struct PaddedKeySerializer {
    width: usize,
}

impl PaddedKeySerializer {
    pub fn new(width: usize) -> Result<Self, Error> {
        if width == 0 {
            return Err(Error::configuration("padded key width must be at least 1"));
        }
        Ok(Self { width })
    }
}

impl KeySerializer<Vec<u8>> for PaddedKeySerializer {
    fn serialized_size(&self) -> usize {
        self.width
    }

    fn encode(&self, key: &Vec<u8>, buffer: &mut [u8]) -> Result<(), KeyError> {
        check_width(self.width, buffer.len())?;
        let n = key.len().min(self.width);
        buffer[..n].copy_from_slice(&key[..n]);
        buffer[n..].fill(0);
        Ok(())
    }

    fn decode(&self, buffer: &[u8]) -> Result<Vec<u8>, KeyError> {
        check_width(self.width, buffer.len())?;
        Ok(buffer.to_vec())
    }
}

/// Maps string keys onto the first `width` bytes of their SHA-256 digest.
///
/// One-way: `decode` always fails with `KeyError::Irreversible`.
#[derive(Debug, Clone, Copy)]
pub struct HashedKeySerializer {
    width: usize,
}

impl HashedKeySerializer {
    /// Largest supported width, the size of a SHA-256 digest.
    pub const MAX_WIDTH: usize = 32;

    pub fn new(width: usize) -> Result<Self, Error> {
        if width == 0 || width > Self::MAX_WIDTH {
            return Err(Error::configuration(format!(
                "hashed key width must be within 1..={}, got {}",
                Self::MAX_WIDTH,
                width
            )));
        }
        Ok(Self { width })
    }
}

impl KeySerializer<String> for HashedKeySerializer {
    fn serialized_size(&self) -> usize {
        self.width
    }

    fn encode(&self, key: &String, buffer: &mut [u8]) -> Result<(), KeyError> {
        check_width(self.width, buffer.len())?;
        let digest = Sha256::digest(key.as_bytes());
        buffer.copy_from_slice(&digest[..self.width]);
        Ok(())
    }

    fn decode(&self, _buffer: &[u8]) -> Result<String, KeyError> {
        Err(KeyError::Irreversible)
    }
}
