/// XORs `payload` in place with the repeating 4-byte `mask_key`.
///
/// Masking is its own inverse, so the same call unmasks.
pub(crate) fn mask(payload: &mut [u8], mask_key: [u8; 4]) {
    let key = u32::from_ne_bytes(mask_key);
    let mut words = payload.chunks_exact_mut(4);
    for word in &mut words {
        let w = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ key;
        word.copy_from_slice(&w.to_ne_bytes());
    }
    // tail < 4 bytes
    for (b, k) in words.into_remainder().iter_mut().zip(mask_key) {
        *b ^= k;
    }
}
