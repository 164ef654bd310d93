//! Plain-text codec for `text/plain` bodies.

use crate::error::{DapwireError, Result};

/// UTF-8 text codec.
pub struct TextCodec;

impl TextCodec {
    #[inline]
    pub fn encode(text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    /// Decode bytes as UTF-8. Invalid sequences are an error, not replaced.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DapwireError::InvalidUtf8("text body"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8() {
        assert_eq!(TextCodec::decode("héllo".as_bytes()).unwrap(), "héllo");
        assert_eq!(TextCodec::decode(b"").unwrap(), "");
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = TextCodec::decode(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, DapwireError::InvalidUtf8(_)));
    }
}
