pub mod handlers;
pub mod response;
pub mod routes;

pub use routes::{private_router, public_router};
