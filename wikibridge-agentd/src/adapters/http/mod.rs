pub mod error;
pub mod router;
pub mod session_hub;

pub use error::ApiError;
pub use router::{build_router, AppState, HEALTH_PATH, SSE_PATH};
pub use session_hub::{SessionError, SessionHub, MESSAGES_PATH};
