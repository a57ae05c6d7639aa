pub mod export;
pub mod http;
pub mod startup;

pub use http::{create_router, ApiError, ApiState};
pub use startup::{build_state, build_state_with, StartupError};
