pub mod lifecycle;

pub use lifecycle::{BindFailure, LifecycleError, LifecycleOptions, ServerLifecycleManager};
