mod handlers;
mod server;

pub use handlers::ApiError;
pub use server::{router, MonitorServer, ServerState};
