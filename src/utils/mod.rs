use rand::{distributions::Alphanumeric, Rng};

pub const MAX_USERNAME_LEN: usize = 32;

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;
const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

#[inline]
pub const fn gb_to_bytes(gb: u64) -> u64 {
    gb.saturating_mul(BYTES_PER_GB)
}

/// `[A-Za-z0-9_-]{1,32}` without a leading `-`, so a username can never be
/// mistaken for a command-line flag or escape a file path.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && !username.starts_with('-')
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn random_hex_upper(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(HEX_UPPER[rng.gen_range(0..HEX_UPPER.len())]))
        .collect()
}

pub fn random_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
