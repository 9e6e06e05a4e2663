//! Identity asserted by a trusted reverse proxy through a request header.

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;
use std::sync::Arc;
use std::time::Duration;

use super::cache::IdentityCache;
use super::directory::DirectoryProvider;
use super::error::{CacheError, DirectoryError, ProxyAuthError};
use super::store::UserStore;
use crate::config::{AuthProxyConfig, HeaderProperty, PROXY_HEADER_FIELDS};
use crate::models::{ExternalUserInfo, Identity, OrgRole};
use crate::utils::net::{parse_allow_list, parse_remote_ip};

pub const CACHE_PREFIX: &str = "auth-proxy-sync-ttl";
const AUTH_MODULE: &str = "authproxy";

const FNV128_OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV128_PRIME: u128 = 0x0000000001000000000000000000013B;

fn fnv1a_128(data: &[u8]) -> u128 {
    data.iter().fold(FNV128_OFFSET_BASIS, |hash, byte| {
        (hash ^ u128::from(*byte)).wrapping_mul(FNV128_PRIME)
    })
}

/// Cache key for a proxied identity: the prefix plus the FNV-1a/128 hash of
/// the header value and the extra header values joined with `-`. Extra
/// values must be passed in configured field order.
pub fn compute_cache_key<S: AsRef<str>>(header_value: &str, extra_values: &[S]) -> String {
    let mut key = header_value.trim().to_string();
    for value in extra_values {
        key.push('-');
        key.push_str(value.as_ref());
    }
    format!("{}:{:032x}", CACHE_PREFIX, fnv1a_128(key.as_bytes()))
}

/// What the proxy asserted on one request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub header: String,
    /// Non-empty extra header values as `(field, value)` in field order.
    pub extra: Vec<(&'static str, String)>,
    pub remote_addr: String,
    pub org_id: Option<i64>,
}

impl ProxyRequest {
    pub fn cache_key(&self) -> String {
        let values: Vec<&str> = self.extra.iter().map(|(_, v)| v.as_str()).collect();
        compute_cache_key(&self.header, &values)
    }
}

pub struct ProxyAuthenticator {
    config: AuthProxyConfig,
    cache: IdentityCache,
    users: Arc<dyn UserStore>,
    directory: Arc<DirectoryProvider>,
}

impl ProxyAuthenticator {
    pub fn new(
        config: AuthProxyConfig,
        cache: IdentityCache,
        users: Arc<dyn UserStore>,
        directory: Arc<DirectoryProvider>,
    ) -> Self {
        Self {
            config,
            cache,
            users,
            directory,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn has_header(&self, headers: &HeaderMap) -> bool {
        header_value(headers, &self.config.header_name).is_some()
    }

    /// Collects the proxy header and configured extra headers. `None` when
    /// the main header is absent or blank.
    pub fn request(
        &self,
        headers: &HeaderMap,
        remote_addr: &str,
        org_id: Option<i64>,
    ) -> Option<ProxyRequest> {
        let header = header_value(headers, &self.config.header_name)?;

        let extra = PROXY_HEADER_FIELDS
            .iter()
            .filter_map(|field| {
                let name = self.config.headers.get(*field)?;
                header_value(headers, name).map(|value| (*field, value))
            })
            .collect();

        Some(ProxyRequest {
            header,
            extra,
            remote_addr: remote_addr.to_string(),
            org_id,
        })
    }

    pub fn is_allowed_ip(&self, request: &ProxyRequest) -> Result<(), ProxyAuthError> {
        if self.config.whitelist.trim().is_empty() {
            return Ok(());
        }

        let networks: Vec<IpNetwork> = parse_allow_list(&self.config.whitelist)
            .map_err(|e| ProxyAuthError::new("could not get the network", e))?;
        let source = parse_remote_ip(&request.remote_addr)
            .map_err(|e| ProxyAuthError::new("could not parse address", e))?;

        if networks.iter().any(|network| network.contains(source)) {
            return Ok(());
        }

        Err(ProxyAuthError::new(
            "proxy authentication required",
            anyhow::anyhow!(
                "request for user ({}) from {} is not from the authentication proxy",
                request.header,
                source
            ),
        ))
    }

    /// Resolves the header to a local user id. A cache hit short-circuits
    /// unless `ignore_cache`. The result is not cached here; see
    /// [`ProxyAuthenticator::remember`].
    pub async fn login(
        &self,
        request: &ProxyRequest,
        ignore_cache: bool,
    ) -> Result<i64, ProxyAuthError> {
        if !ignore_cache {
            match self.cache.get(&request.cache_key()).await {
                Ok(user_id) => {
                    tracing::debug!(user_id, "Auth proxy cache hit");
                    return Ok(user_id);
                }
                Err(CacheError::NotFound) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Auth proxy cache lookup failed");
                }
            }
        }

        if self.directory.is_enabled() {
            return match self.login_via_directory(request).await {
                Ok(user_id) => Ok(user_id),
                Err(e) if e.is_silent() => {
                    Err(ProxyAuthError::new("proxy authentication required", e))
                }
                Err(e) => Err(ProxyAuthError::new("failed to get the user", e)),
            };
        }

        self.login_via_header(request).await.map_err(|e| {
            ProxyAuthError::new(
                "failed to log in as user, specified in auth proxy header",
                e,
            )
        })
    }

    async fn login_via_directory(&self, request: &ProxyRequest) -> Result<i64, DirectoryError> {
        let client = self.directory.client().await?;
        let mut info = client.user(&request.header).await?;
        info.auth_module = "ldap".to_string();

        let user = self
            .users
            .upsert_external_user(&info, self.directory.allow_sign_up())
            .await
            .map_err(|e| DirectoryError::Search(e.into()))?;
        Ok(user.id)
    }

    async fn login_via_header(&self, request: &ProxyRequest) -> Result<i64, anyhow::Error> {
        let mut info = ExternalUserInfo {
            auth_module: AUTH_MODULE.to_string(),
            auth_id: request.header.clone(),
            ..Default::default()
        };

        match self.config.header_property {
            HeaderProperty::Username => {
                info.login = request.header.clone();
                if looks_like_email(&request.header) {
                    info.email = request.header.clone();
                }
            }
            HeaderProperty::Email => {
                info.email = request.header.clone();
                info.login = request.header.clone();
            }
        }

        for (field, value) in &request.extra {
            match *field {
                "Name" => info.name = value.clone(),
                "Email" => info.email = value.clone(),
                "Login" => info.login = value.clone(),
                "Groups" => {
                    info.groups = value
                        .split(',')
                        .map(str::trim)
                        .filter(|g| !g.is_empty())
                        .map(String::from)
                        .collect()
                }
                "Role" => match value.parse::<OrgRole>() {
                    Ok(role) => info.role = Some(role),
                    Err(e) => tracing::warn!(error = %e, "Ignoring auth proxy role header"),
                },
                _ => {}
            }
        }

        let user = self
            .users
            .upsert_external_user(&info, self.config.auto_sign_up)
            .await?;
        Ok(user.id)
    }

    /// Caches `user_id` for the request's key unless an entry already exists.
    pub async fn remember(&self, request: &ProxyRequest, user_id: i64) -> Result<(), CacheError> {
        let key = request.cache_key();
        if self.cache.get(&key).await.is_ok() {
            return Ok(());
        }

        let ttl = Duration::from_secs(self.config.sync_ttl_minutes.max(0) as u64 * 60);
        self.cache.set(&key, user_id, ttl).await
    }

    pub async fn get_signed_user(
        &self,
        request: &ProxyRequest,
        user_id: i64,
    ) -> Result<Identity, ProxyAuthError> {
        self.users
            .get_signed_in_user(user_id, request.org_id)
            .await
            .map(Identity::signed_in)
            .map_err(|e| ProxyAuthError::new("failed to get the user", e))
    }

    pub async fn remove_from_cache(&self, request: &ProxyRequest) -> Result<(), CacheError> {
        self.cache.delete(&request.cache_key()).await
    }

    /// Full proxy flow: allow-list, login, identity expansion with a single
    /// invalidate-and-retry when the first expansion fails, then remember.
    pub async fn authenticate(
        &self,
        request: &ProxyRequest,
    ) -> Result<Identity, service_core::error::AppError> {
        self.is_allowed_ip(request)?;

        let mut user_id = self.login(request, false).await?;
        let identity = match self.get_signed_user(request, user_id).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(
                    user_id,
                    error = %e,
                    "Failed to resolve proxied user, retrying without cache"
                );
                match self.remove_from_cache(request).await {
                    Ok(()) | Err(CacheError::NotFound) => {}
                    Err(e) => tracing::error!(error = %e, "Failed to remove auth proxy cache entry"),
                }

                user_id = self.login(request, true).await?;
                self.get_signed_user(request, user_id).await?
            }
        };

        if let Err(e) = self.remember(request, user_id).await {
            tracing::error!(user_id, error = %e, "Failed to store proxied user in cache");
            return Err(service_core::error::AppError::internal(
                "Failed to store user in cache",
                e,
            ));
        }

        tracing::debug!(user_id, login = %identity.login, "Resolved user via auth proxy");
        Ok(identity)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}
