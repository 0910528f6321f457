mod message;
mod session;

pub use message::{Message, Role};
pub use session::{title_from_content, Session, DEFAULT_SESSION_TITLE, MAX_TITLE_LENGTH};
