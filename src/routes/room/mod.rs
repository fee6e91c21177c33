mod handler;
pub mod model;

pub use handler::{create_room, list_rooms};
