use dm_core::{ChatMessage, ChatSession};
use dm_error::{DmError, Result};
use std::path::Path;
use std::sync::Mutex;

pub const SESSIONS_KEY: &str = "documind_chat_sessions";
pub const LEGACY_KEY: &str = "documind_chat_history";
pub const MIGRATED_TITLE: &str = "历史对话 (已迁移)";
const WELCOME_ID: &str = "welcome";

/// 本地会话存储：整个会话集合作为一个值读写
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Vec<ChatSession>>;
    fn save(&self, sessions: &[ChatSession]) -> Result<()>;
}

/// 旧版单一历史 -> 一个迁移会话；只有欢迎语时不迁移
pub fn migrate_legacy(messages: Vec<ChatMessage>) -> Option<ChatSession> {
    let first = messages.first()?;
    if first.id == WELCOME_ID {
        return None;
    }
    let now = chrono::Utc::now().timestamp_millis();
    Some(ChatSession {
        id: now.to_string(),
        title: MIGRATED_TITLE.to_string(),
        messages,
        updated_at: now,
    })
}

#[derive(Clone)]
pub struct SledSessionStore {
    db: sled::Db,
}

impl SledSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| DmError::Storage {
            operation: "open_session_db".to_string(),
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;
        Ok(Self { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    fn read_legacy(&self) -> Option<Vec<ChatMessage>> {
        self.db
            .get(LEGACY_KEY)
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice(&v).ok())
    }
}

impl SessionStore for SledSessionStore {
    fn load(&self) -> Result<Vec<ChatSession>> {
        if let Some(raw) = self.db.get(SESSIONS_KEY)? {
            let mut sessions: Vec<ChatSession> = serde_json::from_slice(&raw)?;
            sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            return Ok(sessions);
        }
        let migrated: Vec<ChatSession> = self
            .read_legacy()
            .and_then(migrate_legacy)
            .into_iter()
            .collect();
        if !migrated.is_empty() {
            tracing::info!(
                messages = migrated[0].messages.len(),
                "legacy chat history migrated"
            );
            self.save(&migrated)?;
        }
        Ok(migrated)
    }

    fn save(&self, sessions: &[ChatSession]) -> Result<()> {
        let raw = serde_json::to_vec(sessions)?;
        self.db.insert(SESSIONS_KEY, raw)?;
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<Vec<ChatSession>>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Vec<ChatSession>> {
        Ok(self.sessions.lock().map(|s| s.clone()).unwrap_or_default())
    }

    fn save(&self, sessions: &[ChatSession]) -> Result<()> {
        let mut guard = self.sessions.lock().map_err(|_| DmError::Concurrency {
            operation: "save_sessions".to_string(),
            message: "lock poisoned".to_string(),
        })?;
        *guard = sessions.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy(first_id: &str) -> Vec<ChatMessage> {
        let mut first = ChatMessage::assistant("你好");
        first.id = first_id.to_string();
        vec![first, ChatMessage::user("q")]
    }

    #[test]
    fn test_migration_skips_welcome_only_history() {
        assert!(migrate_legacy(legacy(WELCOME_ID)).is_none());
        assert!(migrate_legacy(vec![]).is_none());
        let s = migrate_legacy(legacy("1700000000000")).unwrap();
        assert_eq!(s.title, MIGRATED_TITLE);
        assert_eq!(s.messages.len(), 2);
    }

    #[test]
    fn test_sled_migrates_legacy_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledSessionStore::open(dir.path().join("chat")).unwrap();
        store
            .db
            .insert(LEGACY_KEY, serde_json::to_vec(&legacy("m1")).unwrap())
            .unwrap();

        let sessions = store.load().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, MIGRATED_TITLE);

        // 已有会话集合后不再读旧键
        store.save(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_sled_round_trip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledSessionStore::open(dir.path().join("chat")).unwrap();
        {
            let old = ChatSession {
                id: "a".into(),
                title: "old".into(),
                messages: vec![],
                updated_at: 1,
            };
            let new = ChatSession {
                id: "b".into(),
                title: "new".into(),
                messages: vec![ChatMessage::user("hi")],
                updated_at: 2,
            };
            store.save(&[old, new]).unwrap();
        }
        let ids: Vec<String> = store.load().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }
}
