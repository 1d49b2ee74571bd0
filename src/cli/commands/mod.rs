mod config;
mod retrieve;
mod serve;
mod status;

pub use config::ConfigCommand;
pub use retrieve::RetrieveArgs;
pub use serve::ServeArgs;

pub use config::handle_config;
pub use retrieve::handle_retrieve;
pub use serve::handle_serve;
pub use status::handle_status;
