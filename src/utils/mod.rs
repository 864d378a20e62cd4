mod base64;
pub use base64::*;

mod env_file;
pub use env_file::*;
