//! Identity sources and the stores behind them.

pub mod api_key;
pub mod cache;
pub mod clock;
pub mod directory;
pub mod error;
pub mod login;
pub mod login_attempts;
pub mod memory;
pub mod proxy;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use api_key::{ApiKeyCodec, ApiKeyToken, GeneratedApiKey};
pub use cache::{CacheStore, IdentityCache, MemoryCache, RedisService};
pub use clock::{Clock, FixedClock, SystemClock};
pub use directory::{
    DirectoryClient, DirectoryClientFactory, DirectoryConnection, DirectoryConnector,
    DirectoryProvider, DirectoryServerConfig, DirectorySettings, FileDirectorySettings,
    MultiDirectory, MultiDirectoryFactory, ServerStatus, StaticDirectorySettings,
    UnavailableConnector,
};
pub use error::{ApiKeyError, CacheError, DirectoryError, ProxyAuthError, SessionError, StoreError};
pub use login::LoginService;
pub use login_attempts::LoginAttempts;
pub use memory::MemoryStore;
pub use proxy::{compute_cache_key, ProxyAuthenticator, ProxyRequest};
pub use session::SessionTokenManager;
pub use store::{RenderService, TokenStore, UserStore};
