//! Session orchestration and storage for routed chat.
//!
//! Provides:
//! - `SessionManager` - Per-request routing: context assembly, agent selection, history
//! - Storage implementations (memory)

pub mod manager;
pub mod storage;

pub use manager::{
    ChatReply, ChatRequest, ManagerError, SelectionPolicy, SessionManager, select_agent,
};
