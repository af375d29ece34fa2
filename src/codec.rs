use std::any::{Any, TypeId};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

/// Wire codec for structured values.
///
/// `Vec<u8>` and `String` payloads never go through the codec: they are
/// stored as raw bytes so that the remote tier holds them verbatim and
/// other clients (for example a redis `INCR` on a numeric string) can
/// operate on them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// MessagePack via `rmp-serde`. Compact binary encoding, the default.
    #[default]
    Msgpack,
    /// JSON via `serde_json`.
    Json,
}

impl Codec {
    /// Look up a codec by its configuration name.
    pub fn from_name(name: &str) -> Option<Codec> {
        match name {
            "msgpack" => Some(Codec::Msgpack),
            "json" => Some(Codec::Json),
            _ => None,
        }
    }

    /// The configuration name of this codec.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Msgpack => "msgpack",
            Codec::Json => "json",
        }
    }

    /// Encode a value to bytes. Raw byte and string values are passed
    /// through untouched.
    pub fn marshal<T>(&self, val: &T) -> Result<Vec<u8>, CacheError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let any = val as &dyn Any;
        if let Some(b) = any.downcast_ref::<Vec<u8>>() {
            return Ok(b.clone());
        }
        if let Some(s) = any.downcast_ref::<String>() {
            return Ok(s.clone().into_bytes());
        }

        match self {
            Codec::Msgpack => rmp_serde::to_vec(val).map_err(CacheError::codec),
            Codec::Json => serde_json::to_vec(val).map_err(CacheError::codec),
        }
    }

    /// Decode bytes into an owned value. Byte and string destinations
    /// receive a copy of the input; the cache's internal buffer is never
    /// handed out.
    pub fn unmarshal<T>(&self, b: &[u8]) -> Result<T, CacheError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        if TypeId::of::<T>() == TypeId::of::<Vec<u8>>() {
            let boxed: Box<dyn Any> = Box::new(b.to_vec());
            return boxed
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|_| CacheError::codec("byte destination downcast failed"));
        }
        if TypeId::of::<T>() == TypeId::of::<String>() {
            let s = String::from_utf8(b.to_vec()).map_err(CacheError::codec)?;
            let boxed: Box<dyn Any> = Box::new(s);
            return boxed
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|_| CacheError::codec("string destination downcast failed"));
        }

        match self {
            Codec::Msgpack => rmp_serde::from_slice(b).map_err(CacheError::codec),
            Codec::Json => serde_json::from_slice(b).map_err(CacheError::codec),
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
