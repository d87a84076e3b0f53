//! Serializer registry.
//!
//! A [`Registry`] maps a Rust type to the [`Codec`] that moves it across the
//! wire. It is an ordinary value: a binding builds one at setup (usually
//! [`Registry::standard`]) and shares it by reference with every call site
//! that encodes or decodes.
//!
//! Looking up a type nobody registered is a programming error and panics; it
//! never depends on what the peer sent.
//!
//! # Example
//! ```rust
//! use syncwire::{pool::PooledBuffer, registry::Registry, SyncItem};
//!
//! let registry = Registry::standard();
//! let item = SyncItem::file("notes/todo.txt", 12, 1_700_000_000_000).unwrap();
//!
//! let mut buffer = PooledBuffer::with_capacity(64);
//! registry.encode(&item, &mut buffer).unwrap();
//! let decoded: SyncItem = registry.decode(&mut buffer).unwrap();
//!
//! assert_eq!(decoded, item);
//! ```
mod codecs;

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
};

use crate::codec::{ByteSink, ByteSource, CodecError};

pub use codecs::{
    BoolCodec, CommandCodec, I32Codec, I64Codec, OptionalStringCodec, OptionsCodec,
    PathFilterCodec, PrincipalCodec, RemoteErrorCodec, StringCodec, SyncItemCodec,
};

/// Encoder/decoder pair for one type.
///
/// The registry is passed in so composite codecs can delegate nested values.
pub trait Codec<T>: Send + Sync {
    fn encode(
        &self,
        registry: &Registry,
        value: &T,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError>;

    fn decode(&self, registry: &Registry, source: &mut dyn ByteSource) -> Result<T, CodecError>;
}

#[derive(Default)]
pub struct Registry {
    codecs: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Registry {
    /// A registry with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the codecs for every built-in wire type.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        codecs::register_builtins(&mut registry);
        registry
    }

    /// Registers `codec` for `T`, replacing any previous one.
    pub fn register<T: 'static>(&mut self, codec: impl Codec<T> + 'static) -> &mut Self {
        let codec: Box<dyn Codec<T>> = Box::new(codec);
        self.codecs.insert(TypeId::of::<T>(), Box::new(codec));
        self
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.codecs.contains_key(&TypeId::of::<T>())
    }

    /// The codec registered for `T`.
    ///
    /// # Panics
    ///
    /// If no codec was registered for `T`.
    pub fn codec<T: 'static>(&self) -> &dyn Codec<T> {
        match self
            .codecs
            .get(&TypeId::of::<T>())
            .and_then(|codec| codec.downcast_ref::<Box<dyn Codec<T>>>())
        {
            Some(codec) => codec.as_ref(),
            None => panic!("no codec registered for {}", type_name::<T>()),
        }
    }

    pub fn encode<T: 'static>(&self, value: &T, sink: &mut dyn ByteSink) -> Result<(), CodecError> {
        self.codec::<T>().encode(self, value, sink)
    }

    pub fn decode<T: 'static>(&self, source: &mut dyn ByteSource) -> Result<T, CodecError> {
        self.codec::<T>().decode(self, source)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("codecs", &self.codecs.len())
            .finish()
    }
}
