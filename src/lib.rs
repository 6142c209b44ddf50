pub mod backend;
pub mod capabilities;
pub mod config;
pub mod emit;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod server;
pub mod translate;

pub use backend::{Backend, HttpBackend};
pub use capabilities::{BackendKind, Capability, CapabilityCache};
pub use config::GatewayConfig;
pub use emit::{emit, EmitOptions, Protocol, StreamFrame};
pub use error::{GatewayError, Result};
pub use logging::SharedJournal;
pub use normalize::{normalize, Normalizer, NormalizedResponse};
pub use server::{build_router, AppState};
