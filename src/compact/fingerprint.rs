//! Repacking of colon-separated hex fingerprints as base64

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};

/// `AB:CD:..` to padded standard base64; `None` if a pair is not hex
pub(crate) fn encode(fingerprint: &str) -> Option<String> {
    let bytes = fingerprint
        .split(':')
        .map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    Some(STANDARD.encode(bytes))
}

/// Inverse of [`encode`]; hex digits come back uppercase
pub(crate) fn decode(packed: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(packed)
        .map_err(|e| Error::compact_decode(format!("bad fingerprint '{}': {}", packed, e)))?;

    let hex = hex::encode_upper(bytes);
    let pairs: Vec<&str> = hex
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect();
    Ok(pairs.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256: &str = "9D:3F:1C:44:E2:0B:7A:58:61:C3:AA:02:98:7E:4D:15:B0:F1:2C:6E:83:D9:57:01:CE:36:9B:A4:5F:70:E8:12";

    #[test]
    fn test_round_trip_sha256() {
        let packed = encode(SHA256).unwrap();
        assert_eq!(packed.len(), 44);
        assert!(packed.ends_with('='));
        assert_eq!(decode(&packed).unwrap(), SHA256);
    }

    #[test]
    fn test_lowercase_hex_decodes_uppercase() {
        let packed = encode("ab:cd:ef").unwrap();
        assert_eq!(packed, "q83v");
        assert_eq!(decode(&packed).unwrap(), "AB:CD:EF");
    }

    #[test]
    fn test_invalid_hex_is_not_compactable() {
        assert!(encode("zz:01").is_none());
        assert!(encode("").is_none());
    }

    #[test]
    fn test_invalid_base64_errors() {
        assert!(decode("not base64!").is_err());
    }
}
