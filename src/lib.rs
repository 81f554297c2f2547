//! persona-reply: out-of-office auto responder with persona-flavored replies.

pub mod channels;
pub mod config;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod orchestrator;
pub mod personas;
pub mod reply;
pub mod shutdown;
