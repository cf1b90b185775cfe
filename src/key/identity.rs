//! # Key Identity
//!
//! `KeyIdentity` is the immutable byte identity of a key once it has been
//! turned into its storage representation. Identities compare and hash
//! structurally. The 4- and 8-byte widths produced by the default `u32`/`u64`
//! codecs are stored inline and compared as single machine words; every
//! other width is stored behind a shared slice.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::serializer::KeySerializer;
use crate::error::KeyError;

/// Immutable, non-empty byte identity of a key.
#[derive(Clone)]
pub struct KeyIdentity {
    repr: Repr,
}

// Construction always normalizes: a 4-byte key is `Four`, an 8-byte key is
// `Eight`. Equal identities therefore always share a variant.
#[derive(Clone)]
enum Repr {
    Four([u8; 4]),
    Eight([u8; 8]),
    Bytes(Arc<[u8]>),
}

impl KeyIdentity {
    /// Build an identity from raw key bytes.
    ///
    /// # Errors
    /// * `KeyError::Empty` if `bytes` is empty
    pub fn new(bytes: &[u8]) -> Result<Self, KeyError> {
        let repr = match bytes.len() {
            0 => return Err(KeyError::Empty),
            4 => {
                let mut word = [0u8; 4];
                word.copy_from_slice(bytes);
                Repr::Four(word)
            }
            8 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(bytes);
                Repr::Eight(word)
            }
            _ => Repr::Bytes(Arc::from(bytes)),
        };
        Ok(Self { repr })
    }

    /// Encode `key` with `serializer` and wrap the result.
    pub fn from_key<K, S>(serializer: &S, key: &K) -> Result<Self, KeyError>
    where
        S: KeySerializer<K> + ?Sized,
    {
        let mut buffer = vec![0u8; serializer.serialized_size()];
        serializer.encode(key, &mut buffer)?;
        Self::new(&buffer)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.repr {
            Repr::Four(word) => word,
            Repr::Eight(word) => word,
            Repr::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Always false; identities hold at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl PartialEq for KeyIdentity {
    fn eq(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Four(a), Repr::Four(b)) => u32::from_ne_bytes(*a) == u32::from_ne_bytes(*b),
            (Repr::Eight(a), Repr::Eight(b)) => u64::from_ne_bytes(*a) == u64::from_ne_bytes(*b),
            _ => self.as_bytes() == other.as_bytes(),
        }
    }
}

impl Eq for KeyIdentity {}

impl Hash for KeyIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.repr {
            Repr::Four(word) => state.write_u32(u32::from_ne_bytes(*word)),
            Repr::Eight(word) => state.write_u64(u64::from_ne_bytes(*word)),
            Repr::Bytes(bytes) => state.write(bytes),
        }
    }
}

impl fmt::Debug for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyIdentity({})", self)
    }
}

impl fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.as_bytes() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for KeyIdentity {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
