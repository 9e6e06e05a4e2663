pub mod basic_auth;
pub mod cookies;
pub mod net;
pub mod password;

pub use basic_auth::{decode_basic_auth_header, encode_basic_auth_header};
pub use password::{hash_password, verify_password, Password};
