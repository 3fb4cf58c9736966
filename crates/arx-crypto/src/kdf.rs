//! BLAKE2b-chained key derivation.

use crate::SecretBytes;

/// Derive `n_outputs` 32-byte keys from `ikm` under a chaining/domain value.
///
/// Extract: `temp = BLAKE2b-64(ikm, key = chaining)`.
/// Expand:  `T_0 = []`, `T_k = BLAKE2b-32(T_{k-1} || [k], key = temp)`.
///
/// The counter byte starts at 1, so requesting more than 255 outputs is out
/// of contract (the block store and channel setup need two or three).
pub fn hkdf(chaining: &[u8], ikm: &[u8], n_outputs: usize) -> Vec<SecretBytes<32>> {
    debug_assert!(n_outputs <= 255);
    let temp = blake2b_simd::Params::new()
        .hash_length(64)
        .key(chaining)
        .hash(ikm);

    let mut outputs = Vec::with_capacity(n_outputs);
    let mut prev: Vec<u8> = Vec::new();
    for k in 1..=n_outputs as u8 {
        let mut input = prev.clone();
        input.push(k);
        let t = blake2b_simd::Params::new()
            .hash_length(32)
            .key(temp.as_bytes())
            .hash(&input);
        let mut out = [0u8; 32];
        out.copy_from_slice(t.as_bytes());
        prev = t.as_bytes().to_vec();
        outputs.push(SecretBytes::new(out));
    }
    outputs
}

/// Convenience for the common two-key split (data key, nonce key).
pub fn hkdf_pair(chaining: &[u8], ikm: &[u8]) -> (SecretBytes<32>, SecretBytes<32>) {
    let mut keys = hkdf(chaining, ikm, 2);
    let second = keys.pop().expect("two outputs");
    let first = keys.pop().expect("two outputs");
    (first, second)
}
