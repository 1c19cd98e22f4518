//! Nefit Easy thermostat integration.
//!
//! Each configured appliance becomes a device whose capabilities are kept in
//! sync with the backend by a periodic poll, and whose writable capabilities
//! are forwarded to the backend after a read-back check.

mod alarm;
mod availability;
mod bridge;
mod capability;
mod client;
mod config;
mod credentials;
mod debounce;
mod device;
mod error;
#[allow(clippy::module_inception)]
mod nefit_easy;
mod pairing;
mod port;
mod reconcile;
mod scheduler;
mod settings;
mod store;
mod write;

use std::sync::Arc;

use anyhow::Context;
pub use availability::AvailabilityState;
pub use bridge::BridgeClientFactory;
pub use capability::Capability;
pub use capability::CapabilityValue;
pub use config::Config as NefitEasyConfig;
use config::Config;
pub use error::Error;
use linkme::distributed_slice;
pub use nefit_easy::INTEGRATION_NAME;
pub use nefit_easy::NefitEasyIntegration;
pub use pairing::APP_VERSION;
pub use pairing::pair;
pub use settings::Credentials;
pub use settings::DeviceSettings;
pub use settings::SettingsPatch;
pub use write::WriteOutcome;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_nefit_easy(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let config = if let Some(c) = &ctx.config.integrations.nefit_easy {
        c
    } else {
        return Ok(None);
    };

    let factory = BridgeClientFactory::new(&config.bridge_url)
        .context("Failed to create Nefit Easy bridge client")?;
    Ok(Some(Box::new(NefitEasyIntegration::new(
        Arc::new(factory),
        config,
        ctx.config.system.debug,
    ))))
}
