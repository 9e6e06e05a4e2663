pub mod api_key;
pub mod identity;
pub mod session_token;
pub mod user;

pub use api_key::StoredApiKey;
pub use identity::{Identity, Org, OrgRole, RenderUser};
pub use session_token::{RotateCommand, SessionToken};
pub use user::{ExternalUserInfo, LoginQuery, User};
