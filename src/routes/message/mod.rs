mod handler;
pub mod model;

pub use handler::{get_messages, mark_read, send_message};
