use std::sync::Arc;

use config::Config;
use socket::hub::ChatHub;
use socket::presence::PresenceService;
use store::{MessageStore, RoomStore, UserDirectory};

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod socket;
pub mod store;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub rooms: Arc<dyn RoomStore>,
    pub messages: Arc<dyn MessageStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub presence: Arc<dyn PresenceService>,
    pub hub: Arc<ChatHub>,
}
