//! 单用户密码门
//!
//! 登录成功后返回的令牌就是密码的 SHA-256 摘要，API 以 Bearer 方式校验。

pub mod gate;
pub mod middleware;
pub mod password;

pub use gate::{AuthGate, MemoryTokenCache, SledTokenCache, TokenCache, AUTH_KEY, WRONG_PASSWORD};
pub use middleware::{bearer_token, BearerAuthorizer};
pub use password::{hash_password, verify_password, DEFAULT_PASSWORD_HASH};

pub use dm_error::{DmError, Result};
