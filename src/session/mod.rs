//! 会话层：连续性状态机 + 存储抽象（内存 / SQLite）

pub mod manager;
pub mod sqlite;
pub mod store;

pub use manager::{
    ConversationTurn, Role, SessionData, SessionHandle, SessionMetadata, SessionState,
};
pub use sqlite::SqliteSessionStore;
pub use store::{create_session_store, MemorySessionStore, SessionStore, StoreStats};
