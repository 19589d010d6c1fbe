pub mod response;
pub mod snapshot;

pub use snapshot::{build_router, AppState};
