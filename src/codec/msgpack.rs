//! MsgPack codec using `rmp-serde`, for `xapplication/msgpack` bodies.
//!
//! Structs are always encoded with `to_vec_named` (struct-as-map), so a
//! body decoded into a `serde_json::Value` keeps its field names.

use crate::error::Result;

/// MessagePack codec for structured bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes in struct-as-map format.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
