//! Bot API integration: typed wire structs and the HTTPS client.

mod api;
pub mod types;

pub use api::BotClient;
