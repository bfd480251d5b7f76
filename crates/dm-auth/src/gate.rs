use crate::password::{hash_password, DEFAULT_PASSWORD_HASH};
use dm_error::{DmError, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const AUTH_KEY: &str = "documind_auth";
pub const WRONG_PASSWORD: &str = "密码错误，请重试";

/// 本地令牌缓存，保存登录成功时的摘要
pub trait TokenCache: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct SledTokenCache {
    db: sled::Db,
}

impl SledTokenCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| DmError::Storage {
            operation: "open_auth_db".to_string(),
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;
        Ok(Self { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }
}

impl TokenCache for SledTokenCache {
    fn get(&self) -> Option<String> {
        self.db
            .get(AUTH_KEY)
            .ok()
            .flatten()
            .and_then(|v| String::from_utf8(v.to_vec()).ok())
    }

    fn set(&self, token: &str) -> Result<()> {
        self.db.insert(AUTH_KEY, token.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.db.remove(AUTH_KEY)?;
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTokenCache {
    token: Mutex<Option<String>>,
}

impl TokenCache for MemoryTokenCache {
    fn get(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn set(&self, token: &str) -> Result<()> {
        if let Ok(mut t) = self.token.lock() {
            *t = Some(token.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut t) = self.token.lock() {
            *t = None;
        }
        Ok(())
    }
}

/// 单用户密码门
///
/// 令牌就是密码摘要本身：拿到摘要即可通过校验，且不会过期。
/// 这里只做访问门槛，不是安全边界。
#[derive(Clone)]
pub struct AuthGate {
    expected_hash: String,
    cache: Arc<dyn TokenCache>,
}

impl AuthGate {
    /// `expected_hash` 为空时使用预置摘要
    pub fn new(expected_hash: Option<String>, cache: Arc<dyn TokenCache>) -> Self {
        let expected_hash = expected_hash
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_PASSWORD_HASH.to_string());
        Self {
            expected_hash,
            cache,
        }
    }

    pub fn in_memory(expected_hash: Option<String>) -> Self {
        Self::new(expected_hash, Arc::new(MemoryTokenCache::default()))
    }

    /// 成功时缓存并返回令牌
    pub fn login(&self, password: &str) -> Result<String> {
        let hash = hash_password(password);
        if hash != self.expected_hash {
            tracing::warn!("login rejected");
            return Err(DmError::Authentication {
                message: WRONG_PASSWORD.to_string(),
            });
        }
        self.cache.set(&hash)?;
        tracing::info!("login accepted");
        Ok(hash)
    }

    pub fn logout(&self) -> Result<()> {
        self.cache.clear()
    }

    pub fn is_authenticated(&self) -> bool {
        self.cache.get().as_deref() == Some(self.expected_hash.as_str())
    }

    /// 已登录且请求携带的令牌与缓存一致
    pub fn check_token(&self, token: &str) -> bool {
        self.is_authenticated() && token == self.expected_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::hash_password;

    #[test]
    fn test_login_logout_cycle() {
        let gate = AuthGate::in_memory(None);
        assert!(!gate.is_authenticated());

        let err = gate.login("wrong").unwrap_err();
        assert_eq!(err.user_message(), WRONG_PASSWORD);
        assert!(!gate.is_authenticated());

        let token = gate.login("fit").unwrap();
        assert_eq!(token, DEFAULT_PASSWORD_HASH);
        assert!(gate.is_authenticated());
        assert!(gate.check_token(&token));
        assert!(!gate.check_token("nope"));

        gate.logout().unwrap();
        assert!(!gate.is_authenticated());
        assert!(!gate.check_token(&token));
    }

    #[test]
    fn test_configured_hash_overrides_default() {
        let gate = AuthGate::in_memory(Some(hash_password("secret").to_uppercase()));
        assert!(gate.login("fit").is_err());
        assert!(gate.login("secret").is_ok());
    }

    #[test]
    fn test_sled_cache_survives_new_gate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SledTokenCache::open(dir.path().join("auth")).unwrap());
        AuthGate::new(None, cache.clone()).login("fit").unwrap();
        let gate = AuthGate::new(None, cache);
        assert!(gate.is_authenticated());
    }

    #[test]
    fn test_stale_cached_hash_is_not_authenticated() {
        let cache = Arc::new(MemoryTokenCache::default());
        cache.set(&hash_password("old")).unwrap();
        assert!(!AuthGate::new(None, cache).is_authenticated());
    }
}
