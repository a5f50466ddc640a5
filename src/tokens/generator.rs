use rand::RngCore;

/// Random bytes behind each access and refresh value (hex doubles the length).
pub const TOKEN_BYTES: usize = 64;

/// Generate `len` random bytes from the thread-local CSPRNG, hex encoded.
pub fn generate_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
