//! Hex codec for wire and file fields.
//!
//! Encoding is lowercase with no separators; decoding is
//! case-insensitive. Malformed input (odd length, non-hex digits)
//! decodes to an empty buffer, which callers treat as invalid.

pub fn encode(data: impl AsRef<[u8]>) -> String {
    hex::encode(data)
}

pub fn decode(input: &str) -> Vec<u8> {
    hex::decode(input).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_lowercase() {
        let bytes = [0x00, 0x1f, 0xab, 0xff];
        let encoded = encode(bytes);
        assert_eq!(encoded, "001fabff");
        assert_eq!(decode(&encoded), bytes);
    }

    #[test]
    fn decode_is_case_insensitive() {
        assert_eq!(decode("AbCd"), vec![0xab, 0xcd]);
        assert_eq!(decode("abcd"), vec![0xab, 0xcd]);
    }

    #[test]
    fn odd_length_input_decodes_to_empty() {
        assert!(decode("abc").is_empty());
    }

    #[test]
    fn non_hex_digits_decode_to_empty() {
        assert!(decode("zz").is_empty());
    }
}
