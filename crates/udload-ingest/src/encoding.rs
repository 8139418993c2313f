//! Byte-level text encoding detection for delimited files

use encoding_rs::{DecoderResult, GBK};
use std::path::Path;

/// Leading bytes inspected when choosing an encoding
pub const SAMPLE_SIZE: usize = 8 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Candidate text encodings, most likely first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Gbk,
    /// Nothing matched; invalid sequences become U+FFFD
    Utf8Lossy,
}

impl TextEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Gbk => "gbk",
            TextEncoding::Utf8Lossy => "utf-8 (lossy)",
        }
    }

    /// Decode a complete buffer
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                match std::str::from_utf8(body) {
                    Ok(text) => text.to_owned(),
                    // Invalid bytes past the sample
                    Err(_) => String::from_utf8_lossy(body).into_owned(),
                }
            },
            TextEncoding::Gbk => GBK.decode_without_bom_handling(bytes).0.into_owned(),
            TextEncoding::Utf8Lossy => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the first encoding that accepts the sample
pub fn detect(sample: &[u8]) -> TextEncoding {
    let sample = &sample[..sample.len().min(SAMPLE_SIZE)];

    if is_utf8_prefix(sample) {
        TextEncoding::Utf8
    } else if is_gbk_prefix(sample) {
        TextEncoding::Gbk
    } else {
        TextEncoding::Utf8Lossy
    }
}

/// Read and decode a whole file
pub fn read_text(path: &Path) -> std::io::Result<(String, TextEncoding)> {
    let bytes = std::fs::read(path)?;
    let encoding = detect(&bytes);
    Ok((encoding.decode(&bytes), encoding))
}

// A character split by the end of the sample is still valid
fn is_utf8_prefix(sample: &[u8]) -> bool {
    let body = sample.strip_prefix(UTF8_BOM).unwrap_or(sample);
    match std::str::from_utf8(body) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

fn is_gbk_prefix(sample: &[u8]) -> bool {
    let mut decoder = GBK.new_decoder_without_bom_handling();
    let Some(capacity) = decoder.max_utf8_buffer_length_without_replacement(sample.len()) else {
        return false;
    };
    let mut out = String::with_capacity(capacity);
    let (result, _) = decoder.decode_to_string_without_replacement(sample, &mut out, false);
    !matches!(result, DecoderResult::Malformed(..))
}
