use zeroize::Zeroizing;

/// HMAC block length for SHA-256, in bytes.
pub const HMAC_BLOCK_LENGTH: usize = 32;

/// Expand a channel secret and a signing timestamp into an HMAC key.
///
/// The `secret ++ timestamp` chunk is repeated until the key is at least
/// `block_length` bytes long and then capped at `2 * block_length`. The returned
/// buffer is zeroized, spare capacity included, when it is dropped.
pub fn stretch_key(secret: &[u8], timestamp: &str, block_length: usize) -> Zeroizing<Vec<u8>> {
    let chunk_length = secret.len() + timestamp.len();
    let mut material = Zeroizing::new(Vec::with_capacity(block_length.max(chunk_length) * 2));

    if chunk_length == 0 {
        return material;
    }

    loop {
        material.extend_from_slice(secret);
        material.extend_from_slice(timestamp.as_bytes());
        if material.len() >= block_length {
            break;
        }
    }

    material.truncate(2 * block_length);
    material
}
