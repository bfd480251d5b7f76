pub mod citation;
pub mod config;
pub mod library;
pub mod models;

pub use citation::{render_citations, CitationRef, RenderedMessage};
pub use config::AppConfig;
pub use library::{filter_records, Library, Selection};
pub use models::{
    ChatMessage, ChatRole, ChatSession, DocRecord, ExtractedContent, FileSource,
    ProcessingStatus, UploadFile, UploadQueueItem,
};

pub use dm_error::{DmError as Error, Result};
