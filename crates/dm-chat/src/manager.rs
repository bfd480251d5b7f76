use crate::store::SessionStore;
use dm_core::{ChatMessage, ChatSession, DocRecord};
use dm_error::{DmError, Result};
use dm_llm::{build_context, format_history, AnswerModel, EMPTY_ANSWER};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const NO_DOCUMENTS: &str = "请先上传一些文档到知识库，我才能回答问题。";
pub const ANSWER_FAILED: &str = "抱歉，处理请求时遇到错误，请稍后重试。";
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
const TITLE_CHARS: usize = 15;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SendOutcome {
    /// 知识库为空，未调用问答服务
    NoDocuments { message: String },
    #[serde(rename_all = "camelCase")]
    Answered { session_id: String, reply: ChatMessage },
    /// 问答失败，会话里记了一条错误消息
    #[serde(rename_all = "camelCase")]
    Failed { session_id: String, reply: ChatMessage },
}

impl SendOutcome {
    pub fn reply(&self) -> Option<&ChatMessage> {
        match self {
            SendOutcome::Answered { reply, .. } | SendOutcome::Failed { reply, .. } => Some(reply),
            SendOutcome::NoDocuments { .. } => None,
        }
    }
}

#[derive(Default)]
struct ChatState {
    sessions: Arc<Vec<ChatSession>>,
    /// None 表示正在起草新会话
    active: Option<String>,
}

/// 截取前 15 个字符作为会话标题
pub fn derive_title(question: &str) -> String {
    if question.chars().count() > TITLE_CHARS {
        let head: String = question.chars().take(TITLE_CHARS).collect();
        format!("{}...", head)
    } else {
        question.to_string()
    }
}

fn sort_recent(sessions: &mut [ChatSession]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct ConversationManager {
    state: Mutex<ChatState>,
    store: Arc<dyn SessionStore>,
    answerer: Arc<dyn AnswerModel>,
    history_window: usize,
}

impl ConversationManager {
    /// 载入已保存会话并激活最近的一个
    pub fn open(
        store: Arc<dyn SessionStore>,
        answerer: Arc<dyn AnswerModel>,
        history_window: usize,
    ) -> Result<Self> {
        let mut sessions = store.load()?;
        sort_recent(&mut sessions);
        let active = sessions.first().map(|s| s.id.clone());
        tracing::info!(sessions = sessions.len(), "chat sessions loaded");
        Ok(Self {
            state: Mutex::new(ChatState {
                sessions: Arc::new(sessions),
                active,
            }),
            store,
            answerer,
            history_window,
        })
    }

    pub async fn sessions(&self) -> Arc<Vec<ChatSession>> {
        self.state.lock().await.sessions.clone()
    }

    pub async fn active(&self) -> Option<ChatSession> {
        let state = self.state.lock().await;
        let id = state.active.as_deref()?;
        state.sessions.iter().find(|s| s.id == id).cloned()
    }

    pub async fn active_id(&self) -> Option<String> {
        self.state.lock().await.active.clone()
    }

    /// 进入起草状态，下一次提问时才真正创建会话
    pub async fn new_session(&self) {
        self.state.lock().await.active = None;
    }

    pub async fn select(&self, id: &str) -> Result<ChatSession> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| DmError::not_found(format!("chat session {}", id)))?;
        state.active = Some(session.id.clone());
        Ok(session)
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<ChatSession> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DmError::invalid("title must not be empty"));
        }
        let mut state = self.state.lock().await;
        let mut next = state.sessions.as_ref().clone();
        let session = next
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| DmError::not_found(format!("chat session {}", id)))?;
        session.title = title.to_string();
        let renamed = session.clone();
        self.commit(&mut state, next);
        Ok(renamed)
    }

    /// 删除会话；删的是当前会话时切到最近的一个
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.sessions.iter().any(|s| s.id == id) {
            return Err(DmError::not_found(format!("chat session {}", id)));
        }
        let next: Vec<ChatSession> = state
            .sessions
            .iter()
            .filter(|s| s.id != id)
            .cloned()
            .collect();
        if state.active.as_deref() == Some(id) {
            state.active = next.first().map(|s| s.id.clone());
        }
        self.commit(&mut state, next);
        Ok(())
    }

    pub async fn send(&self, question: &str, records: &[DocRecord]) -> Result<SendOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DmError::invalid("question must not be empty"));
        }
        if records.is_empty() {
            return Ok(SendOutcome::NoDocuments {
                message: NO_DOCUMENTS.to_string(),
            });
        }

        let (session_id, history) = self.append_question(question).await;

        let context = build_context(records);
        let reply = match self.answerer.answer(question, &context, &history).await {
            Ok(answer) if answer.trim().is_empty() => ChatMessage::assistant(EMPTY_ANSWER),
            Ok(answer) => ChatMessage::assistant(answer),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "answer failed");
                ChatMessage::assistant_error(ANSWER_FAILED)
            }
        };

        self.append_reply(&session_id, reply.clone()).await;
        Ok(if reply.is_error {
            SendOutcome::Failed { session_id, reply }
        } else {
            SendOutcome::Answered { session_id, reply }
        })
    }

    /// 乐观写入用户消息；返回会话 id 和提问前的历史
    async fn append_question(&self, question: &str) -> (String, String) {
        let mut state = self.state.lock().await;
        let mut next = state.sessions.as_ref().clone();
        let active = state
            .active
            .clone()
            .filter(|id| next.iter().any(|s| &s.id == id));
        let session_id = match active {
            Some(id) => id,
            None => {
                let session = ChatSession {
                    id: uuid::Uuid::new_v4().to_string(),
                    title: derive_title(question),
                    messages: vec![],
                    updated_at: now_ms(),
                };
                let id = session.id.clone();
                next.insert(0, session);
                state.active = Some(id.clone());
                id
            }
        };

        let mut history = String::new();
        if let Some(session) = next.iter_mut().find(|s| s.id == session_id) {
            history = format_history(&session.messages, self.history_window);
            session.messages.push(ChatMessage::user(question));
            session.updated_at = now_ms();
        }
        self.commit(&mut state, next);
        (session_id, history)
    }

    async fn append_reply(&self, session_id: &str, reply: ChatMessage) {
        let mut state = self.state.lock().await;
        let mut next = state.sessions.as_ref().clone();
        // 等待回答期间会话可能已被删除
        let Some(session) = next.iter_mut().find(|s| s.id == session_id) else {
            tracing::info!(session_id, "session deleted before reply arrived");
            return;
        };
        session.messages.push(reply);
        session.updated_at = now_ms();
        self.commit(&mut state, next);
    }

    fn commit(&self, state: &mut ChatState, mut next: Vec<ChatSession>) {
        sort_recent(&mut next);
        if let Err(e) = self.store.save(&next) {
            tracing::warn!(error = %e, "failed to persist chat sessions");
        }
        state.sessions = Arc::new(next);
    }
}
