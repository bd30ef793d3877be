//! Charset detection and line decoding
//!
//! Wordlists come in whatever encoding their authors used. The first block of the
//! decoded stream is sampled once per file and every line is transcoded to UTF-8.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// UTF-8 byte order mark
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Sample size used for charset detection (64KB)
pub const SAMPLE_SIZE: usize = 64 * 1024;

/// Result of encoding detection
#[derive(Debug, Clone)]
pub struct EncodingInfo {
    /// Detected encoding name
    pub name: &'static str,
    /// Confidence level (0.0 - 1.0)
    pub confidence: f32,
    /// The encoding_rs Encoding reference
    pub encoding: &'static Encoding,
}

impl Default for EncodingInfo {
    fn default() -> Self {
        Self {
            name: "UTF-8",
            confidence: 1.0,
            encoding: encoding_rs::UTF_8,
        }
    }
}

/// Detect the encoding of a stream from its first bytes
pub fn detect_from_sample(sample: &[u8]) -> EncodingInfo {
    let sample = &sample[..sample.len().min(SAMPLE_SIZE)];
    if sample.is_empty() || sample.starts_with(&UTF8_BOM) {
        return EncodingInfo::default();
    }

    // Valid UTF-8 (including a sample cut mid-character at the end) needs no guessing
    match std::str::from_utf8(sample) {
        Ok(_) => return EncodingInfo::default(),
        Err(e) if e.error_len().is_none() => return EncodingInfo::default(),
        Err(_) => {}
    }

    let mut detector = EncodingDetector::new();
    detector.feed(sample, true);
    let encoding = detector.guess(None, true);

    // Line splitting happens on raw b'\n', so only ASCII-compatible encodings are usable
    if !encoding.is_ascii_compatible() {
        log::warn!("Detected {} is not ASCII compatible, decoding as UTF-8", encoding.name());
        return EncodingInfo {
            confidence: 0.5,
            ..EncodingInfo::default()
        };
    }

    EncodingInfo {
        name: encoding.name(),
        confidence: if encoding == encoding_rs::UTF_8 { 0.5 } else { 0.8 },
        encoding,
    }
}

/// Remove a leading UTF-8 BOM
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&UTF8_BOM[..]).unwrap_or(bytes)
}

/// Decode a raw line (without terminator) into UTF-8
pub fn decode_line(bytes: &[u8], encoding: &'static Encoding) -> String {
    if encoding == encoding_rs::UTF_8 {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        }
    } else {
        let (decoded, _, had_errors) = encoding.decode(bytes);
        if had_errors {
            log::debug!("Encoding errors in line, using lossy conversion");
        }
        decoded.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_detection() {
        let info = detect_from_sample("Hello, World!\nПривет мир!\n".as_bytes());
        assert_eq!(info.name, "UTF-8");
        assert_eq!(info.confidence, 1.0);
    }

    #[test]
    fn test_truncated_utf8_sample_is_still_utf8() {
        let text = "пароль".as_bytes();
        let info = detect_from_sample(&text[..text.len() - 1]);
        assert_eq!(info.encoding, encoding_rs::UTF_8);
    }

    #[test]
    fn test_latin1_wordlist() {
        // "contraseña\nmañana\n" in windows-1252
        let sample = b"contrase\xf1a\nma\xf1ana\nespa\xf1ol\n".repeat(64);
        let info = detect_from_sample(&sample);
        assert_ne!(info.encoding, encoding_rs::UTF_8);
        assert!(info.encoding.is_ascii_compatible());
        assert_eq!(decode_line(b"contrase\xf1a", encoding_rs::WINDOWS_1252), "contraseña");
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBFword"), b"word");
        assert_eq!(strip_bom(b"word"), b"word");
    }

    #[test]
    fn test_lossy_utf8_decode() {
        let decoded = decode_line(b"ab\xffcd", encoding_rs::UTF_8);
        assert_eq!(decoded, "ab\u{FFFD}cd");
    }
}
