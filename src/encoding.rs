// ABOUTME: Named payload encoders and the registry used to negotiate a mutual one
// ABOUTME: Ships JSON and MessagePack encoders plus an identity encoder used by the test suite

use crate::error::SessionError;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A named pair of pure functions selected by the encoding handshake.
/// Generic over the application's payload type `V` rather than a dynamic
/// value, so a typed `Session<V>` never needs to downcast.
pub trait Encoder<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Bytes, SessionError>;
    fn decode(&self, bytes: &[u8]) -> Result<V, SessionError>;
}

/// Encodes `V` as JSON via `serde_json`.
pub struct JsonEncoder<V>(PhantomData<fn() -> V>);

impl<V> JsonEncoder<V> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V> Default for JsonEncoder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Serialize + DeserializeOwned + Send + Sync> Encoder<V> for JsonEncoder<V> {
    fn encode(&self, value: &V) -> Result<Bytes, SessionError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| SessionError::Encoding(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, SessionError> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::Encoding(e.to_string()))
    }
}

/// Encodes `V` as MessagePack via `rmp-serde`.
pub struct RmpEncoder<V>(PhantomData<fn() -> V>);

impl<V> RmpEncoder<V> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V> Default for RmpEncoder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Serialize + DeserializeOwned + Send + Sync> Encoder<V> for RmpEncoder<V> {
    fn encode(&self, value: &V) -> Result<Bytes, SessionError> {
        rmp_serde::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| SessionError::Encoding(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, SessionError> {
        rmp_serde::from_slice(bytes).map_err(|e| SessionError::Encoding(e.to_string()))
    }
}

/// Identity encoder for `Bytes` payloads: `encode`/`decode` are the
/// identity function. Used by the end-to-end scenario tests, which don't
/// need real serialization to exercise the session's framing and routing.
#[derive(Default)]
pub struct IdentityEncoder;

impl Encoder<Bytes> for IdentityEncoder {
    fn encode(&self, value: &Bytes) -> Result<Bytes, SessionError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bytes, SessionError> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Registers named encoders and picks a mutual one from a peer-advertised
/// list.
pub struct EncodingRegistry<V> {
    encoders: HashMap<String, Arc<dyn Encoder<V>>>,
}

impl<V> Default for EncodingRegistry<V> {
    fn default() -> Self {
        Self {
            encoders: HashMap::new(),
        }
    }
}

impl<V> EncodingRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, encoder: Arc<dyn Encoder<V>>) {
        self.encoders.insert(name.into(), encoder);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Encoder<V>>> {
        self.encoders.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.encoders.keys().cloned().collect()
    }

    /// Returns the first name in `candidates` that this registry has an
    /// encoder for, or `None` if the intersection is empty.
    pub fn pick(&self, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .find(|name| self.encoders.contains_key(name.as_str()))
            .cloned()
    }
}
