mod engine;
pub mod events;
mod logger;
pub mod negotiation;
mod settings;

pub use engine::ParlorEngine;
pub use events::EventBus;
pub use negotiation::{is_polite, Negotiation, OfferDecision};
pub use settings::SettingsLoader;
