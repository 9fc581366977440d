//! MajuMail backend: mailbox threading, labels, AI classification and
//! drafting, Postmark delivery and a live notification stream.

pub mod ai;
pub mod llm;
pub mod models;
pub mod notifications;
pub mod service;
pub mod store;
