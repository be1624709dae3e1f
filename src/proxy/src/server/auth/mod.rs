pub mod credentials;

use crate::protocol::mysql::constants::SCRAMBLE_SIZE;

use sha1::{Digest, Sha1};

pub fn sha1_1(bytes: impl AsRef<[u8]>) -> [u8; 20] {
    Sha1::digest(bytes.as_ref()).into()
}

pub fn sha1_2(bytes1: impl AsRef<[u8]>, bytes2: impl AsRef<[u8]>) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(bytes1.as_ref());
    hasher.update(bytes2.as_ref());
    hasher.finalize().into()
}

pub fn xor(mut left: [u8; 20], right: [u8; 20]) -> [u8; 20] {
    for (l, r) in left.iter_mut().zip(right.iter()) {
        *l ^= r;
    }
    left
}

/// `mysql_native_password` proof:
/// `SHA1(password) XOR SHA1(nonce[..len-1] || SHA1(SHA1(password)))`.
///
/// `auth_plugin_data` is the challenge exactly as the server handshake
/// carries it: a 20-byte scramble plus a trailing `0x00`. Only the 20 scramble
/// bytes enter the hash, hence the trim of the final byte. Hashing all 21
/// bytes is the classic way to reimplement this wrong.
pub fn scramble_native_password(password: &[u8], auth_plugin_data: &[u8]) -> [u8; SCRAMBLE_SIZE] {
    let password_hash = sha1_1(password);
    let double_hash = sha1_1(password_hash);
    let trimmed = &auth_plugin_data[..auth_plugin_data.len() - 1];
    xor(password_hash, sha1_2(trimmed, double_hash))
}
