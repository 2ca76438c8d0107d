// all this methods have been copied from tungstenite

//! Payload masking, [RFC 6455 Section 5.3](https://datatracker.ietf.org/doc/html/rfc6455#section-5.3).
//!
//! Masking XORs every payload byte with one byte of a 4-byte key:
//! `out[i] = in[i] ^ key[i % 4]`. Applying the same key twice restores the input.

/// Mask or unmask `buf` in place.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let word = u32::from_ne_bytes(mask);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let value = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&value.to_ne_bytes());
    }

    // the tail starts on a multiple of 4, so it lines up with the key again
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}
