pub mod generator;

pub use generator::{generate_hex, TOKEN_BYTES};
