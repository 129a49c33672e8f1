// ABOUTME: Change-detection checksum for persisted document payloads.
// ABOUTME: 32-bit rolling hash over UTF-16 code units, rendered as signed hex for legacy compatibility.

use serde_json::Value;

/// Compute the rolling hash `h = h * 31 + unit (mod 2^32)` over the UTF-16
/// code units of `text` and render it as signed lowercase hex.
///
/// Negative results keep their sign (`-1a2b`), matching files written by
/// the original JavaScript store. This is change detection only; it is not
/// a cryptographic digest and collisions are easy to construct.
pub fn checksum(text: &str) -> String {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(i32::from(unit));
    }
    render_signed_hex(hash)
}

/// Checksum of a payload's compact JSON serialization.
pub fn payload_checksum(payload: &Value) -> Result<String, serde_json::Error> {
    let serialized = serde_json::to_string(payload)?;
    Ok(checksum(&serialized))
}

fn render_signed_hex(hash: i32) -> String {
    if hash < 0 {
        format!("-{:x}", i64::from(hash).unsigned_abs())
    } else {
        format!("{:x}", hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values_match_legacy_hash() {
        assert_eq!(checksum(""), "0");
        assert_eq!(checksum("a"), "61");
        assert_eq!(checksum("hello"), "5e918d2");
        assert_eq!(checksum(r#"[{"id":"b1","imported":true}]"#), "4ba4a146");
    }

    #[test]
    fn negative_hash_keeps_sign() {
        // Hashes to exactly i32::MIN.
        assert_eq!(checksum("polygenelubricants"), "-80000000");
    }

    #[test]
    fn hashes_utf16_code_units() {
        assert_eq!(checksum("é"), "e9");
        // Surrogate pair: 0xd83d, 0xde00
        assert_eq!(checksum("😀"), "1b0d63");
    }

    #[test]
    fn payload_checksum_uses_compact_json() {
        let payload = serde_json::json!([{"id": "b1", "imported": true}]);
        assert_eq!(payload_checksum(&payload).unwrap(), "4ba4a146");
    }

    #[test]
    fn single_byte_mutations_almost_always_change_checksum() {
        let original = r#"[{"id":"b1","companyName":"Acme Stands","city":"Berlin","rating":4.5}]"#;
        let base = checksum(original);
        let bytes = original.as_bytes();

        let mut sampled = 0;
        let mut changed = 0;
        for (i, _) in bytes.iter().enumerate() {
            for replacement in [b'x', b'0', b' ', b'Z'] {
                if bytes[i] == replacement {
                    continue;
                }
                let mut mutated = bytes.to_vec();
                mutated[i] = replacement;
                let mutated = String::from_utf8(mutated).unwrap();
                sampled += 1;
                if checksum(&mutated) != base {
                    changed += 1;
                }
            }
        }

        // A single code unit change shifts the hash by delta * 31^k, which is
        // never zero mod 2^32 for small deltas.
        assert_eq!(changed, sampled);
    }

    #[test]
    fn collisions_exist_for_crafted_inputs() {
        assert_eq!(checksum("Aa"), checksum("BB"));
    }
}
