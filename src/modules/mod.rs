pub mod server;
pub mod system;
pub mod utils;
