mod error;
mod handlers;
mod router;
mod types;

pub use handlers::core::open_into_state;
pub use router::handle_request;
pub use types::{AppState, Request};
