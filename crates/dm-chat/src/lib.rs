//! 多会话问答：会话持久化在本地，回答带 `[[id]]` 引用标记

pub mod manager;
pub mod store;

pub use manager::{derive_title, ConversationManager, SendOutcome, ANSWER_FAILED, NO_DOCUMENTS};
pub use store::{migrate_legacy, MemorySessionStore, SessionStore, SledSessionStore};
