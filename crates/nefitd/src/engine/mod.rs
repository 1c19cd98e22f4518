mod engine;
mod event;
mod integration;
mod message;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::CommandError;
pub use engine::Engine;
pub use event::Event;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::DeviceState;
pub use state::State;
