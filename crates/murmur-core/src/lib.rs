pub mod bus;
pub mod config;
pub mod errors;
pub mod ids;
pub mod metrics;
pub mod state;

pub use bus::{BusEvent, Channel, EventBus, SubscriptionId};
pub use config::CoreConfig;
pub use errors::VoiceError;
pub use ids::{EventId, SessionId, UtteranceId};
pub use metrics::MetricsRecorder;
pub use state::ConnectionState;
