//! The VM word type and its big-endian file encoding.

use std::io::{self, Read};

use crate::consts::WORD_SIZE;

/// An unsigned 32-bit VM word. Arithmetic wraps modulo 2³²; bitwise
/// operations treat it as an unstructured bit vector.
pub type Word = u32;

/// Decodes a program image from a big-endian byte stream into words.
///
/// The source is read to exhaustion; the caller has already validated that
/// its length is a positive multiple of [`WORD_SIZE`].
pub fn decode_image<R: Read>(mut reader: R) -> io::Result<Vec<Word>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(bytes
        .chunks_exact(WORD_SIZE)
        .map(|chunk| Word::from_be_bytes(chunk.try_into().expect("chunks_exact(4) yields 4 bytes")))
        .collect())
}

/// Encodes a sequence of words back into big-endian bytes (the inverse of
/// [`decode_image`]; used by the round-trip test in §8 and by anything that
/// needs to serialize a segment back to an image).
pub fn encode_image(words: &[Word]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * WORD_SIZE);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes
}
