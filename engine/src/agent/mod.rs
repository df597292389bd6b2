//! Conversation agent
//!
//! The driver that turns user messages into replies, running the code the
//! model asks for along the way, plus the session it operates on.

pub mod core;
pub mod session;
pub mod tool_messages;
pub mod working_memory;

pub use core::{
    AutoApprove, ConversationDriver, DriverSettings, ExecutionApprover, MemoryServices,
    TurnOutcome, TurnStop,
};
pub use session::{load_session, save_session, Session, SessionHandle};
pub use working_memory::WorkingMemory;
