//! Word <-> text codecs.
//!
//! Packed (8-bit): two characters per word, first character in the high
//! byte. Text must be 8-bit (Latin-1); a NUL terminates the string.
//!
//! Unicode: one UTF-16 code unit per word. The word's little-endian byte
//! pair is the UTF-16LE encoding of that unit.

use crate::error::ClientError;

/// Append a NUL when `text` has odd length so it fills whole words.
#[must_use]
pub fn pad_packed(text: &str) -> String {
    let mut s = text.to_string();
    if s.chars().count() % 2 != 0 {
        s.push('\0');
    }
    s
}

/// Encode `text` into packed words. Odd-length input is NUL padded.
pub fn encode_packed(text: &str) -> Result<Vec<u16>, ClientError> {
    let bytes = text
        .chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| {
                ClientError::Encoding(format!(
                    "character {c:?} (U+{:04X}) does not fit in 8 bits",
                    u32::from(c)
                ))
            })
        })
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(bytes
        .chunks(2)
        .map(|pair| {
            let hi = pair[0];
            let lo = pair.get(1).copied().unwrap_or(0);
            u16::from_be_bytes([hi, lo])
        })
        .collect())
}

/// Incremental packed decoder. `push` returns `false` once a NUL has been
/// seen in either byte; no further words are needed after that.
#[derive(Debug, Default)]
pub struct PackedDecoder {
    text: String,
    done: bool,
}

impl PackedDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, word: u16) -> bool {
        if self.done {
            return false;
        }
        for b in word.to_be_bytes() {
            if b == 0 {
                self.done = true;
                return false;
            }
            self.text.push(char::from(b));
        }
        true
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.done
    }

    #[must_use]
    pub fn finish(self) -> String {
        self.text
    }
}

/// Decode packed words, stopping at the first NUL.
#[must_use]
pub fn decode_packed(words: &[u16]) -> String {
    let mut dec = PackedDecoder::new();
    for &w in words {
        if !dec.push(w) {
            break;
        }
    }
    dec.finish()
}

/// Text to UTF-16LE bytes, padded with a zero byte to an even length.
#[must_use]
pub fn utf16le_bytes(text: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    if bytes.len() % 2 != 0 {
        bytes.push(0);
    }
    bytes
}

/// Encode `text` as one word per UTF-16 code unit.
#[must_use]
pub fn encode_unicode(text: &str) -> Vec<u16> {
    utf16le_bytes(text)
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Decode every word as a UTF-16 code unit, then strip trailing NULs only.
/// Unpaired surrogates decode to U+FFFD.
#[must_use]
pub fn decode_unicode(words: &[u16]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// Words needed to hold `text` in the unicode layout.
#[must_use]
pub fn unicode_word_count(text: &str) -> usize {
    utf16le_bytes(text).len().div_ceil(2)
}
