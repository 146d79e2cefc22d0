//! 记忆层：会话历史（只追加）与长期记忆（跨回合检索）

pub mod conversation;
pub mod long_term;

pub use conversation::{ConversationMemory, Message, Role};
pub use long_term::{
    InMemoryLongTerm, LongTermMemory, LongTermRecall, MemoryCollaborator, NoopLongTerm,
};
