//! # Key Module
//!
//! Everything needed to turn an application key into the fixed binary form
//! the storage protocol requires:
//!
//! - **`identity`**: `KeyIdentity`, an immutable structural byte identity
//! - **`serializer`**: the `KeySerializer` codec trait and the default codecs
//! - **`pool`**: `BufferPool`, the rent/release pool used while encoding

pub mod identity;
pub mod pool;
pub mod serializer;

pub use identity::KeyIdentity;
pub use pool::{BufferPool, PooledBuffer, DEFAULT_SHARED_CAPACITY};
pub use serializer::{
    DefaultKeySerializer, HashedKeySerializer, IntKeySerializer, KeySerializer,
    PaddedKeySerializer, UuidKeySerializer,
};
