pub mod api;
pub mod config;
mod engine;
pub mod integrations;

pub use config::Config;
pub use config::LogLevel;
pub use engine::CommandError;
pub use engine::DeviceState;
pub use engine::Engine;
pub use engine::Event;
pub use engine::State;
