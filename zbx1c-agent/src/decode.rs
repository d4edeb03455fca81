//! Byte decoding for rac output
//!
//! rac prints in whatever code page the host console uses: UTF-8 on modern
//! Linux, cp866 on a Windows console, windows-1251 on older installations.
//! Candidates are tried strictly in order; the first clean decode wins.

use encoding_rs::{Encoding, IBM866, UTF_8, WINDOWS_1251, WINDOWS_1252};
use std::borrow::Cow;

/// Default candidate order. windows-1252 maps every byte, so it acts as the
/// Latin-1 style last resort.
pub fn default_candidates() -> [&'static Encoding; 4] {
    [UTF_8, IBM866, WINDOWS_1251, WINDOWS_1252]
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Label reported when every strict candidate failed.
pub const LOSSY_LABEL: &str = "utf-8-lossy";

/// Decode raw rac output with the default candidates. Never fails.
pub fn decode(raw: &[u8]) -> String {
    decode_with(raw, &default_candidates())
}

/// Decode with an explicit candidate list.
pub fn decode_with(raw: &[u8], candidates: &[&'static Encoding]) -> String {
    decode_labelled_with(raw, candidates).0
}

/// Decode with the default candidates and report which encoding matched.
pub fn decode_labelled(raw: &[u8]) -> (String, &'static str) {
    decode_labelled_with(raw, &default_candidates())
}

fn decode_labelled_with(raw: &[u8], candidates: &[&'static Encoding]) -> (String, &'static str) {
    let bytes = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    if bytes.is_empty() {
        return (String::new(), UTF_8.name());
    }

    for encoding in candidates {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            return (Cow::into_owned(text), encoding.name());
        }
    }

    (String::from_utf8_lossy(bytes).into_owned(), LOSSY_LABEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    // "Привет" in the two Cyrillic code pages
    const CP866_PRIVET: &[u8] = &[0x8F, 0xE0, 0xA8, 0xA2, 0xA5, 0xE2];
    const CP1251_PRIVET: &[u8] = &[0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];

    #[test]
    fn empty_input_yields_empty_text() {
        assert_eq!(decode(b""), "");
        assert_eq!(decode(UTF8_BOM), "");
    }

    #[test]
    fn utf8_wins_first() {
        let (text, label) = decode_labelled("name : \"Кластер\"".as_bytes());
        assert_eq!(text, "name : \"Кластер\"");
        assert_eq!(label, "UTF-8");
    }

    #[test]
    fn bom_is_skipped() {
        let mut raw = UTF8_BOM.to_vec();
        raw.extend_from_slice(b"cluster : abc");
        assert_eq!(decode(&raw), "cluster : abc");
    }

    #[test]
    fn console_code_page_is_recognized() {
        let (text, label) = decode_labelled(CP866_PRIVET);
        assert_eq!(text, "Привет");
        assert_eq!(label, "IBM866");
    }

    #[test]
    fn explicit_candidates_are_honoured() {
        assert_eq!(decode_with(CP1251_PRIVET, &[UTF_8, WINDOWS_1251]), "Привет");
    }

    #[test]
    fn lossy_fallback_never_fails() {
        let (text, label) = decode_labelled_with(&[b'a', 0xFF, b'b'], &[UTF_8]);
        assert_eq!(text, "a\u{FFFD}b");
        assert_eq!(label, LOSSY_LABEL);
    }
}
