use sha2::{Digest, Sha256};

/// 预置密码 `fit` 的摘要
pub const DEFAULT_PASSWORD_HASH: &str =
    "da4270e3735a3418c9d462af2e17d045132dede43df058e85b1f0399fcf96f1b";

/// 小写十六进制 SHA-256
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_password(password: &str, expected_hash: &str) -> bool {
    hash_password(password).eq_ignore_ascii_case(expected_hash)
}
