pub mod gmail;
pub mod message;

pub use gmail::{GmailClient, GmailError, Mailbox};
pub use message::MailContent;
