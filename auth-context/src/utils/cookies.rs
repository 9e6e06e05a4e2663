//! Session cookie write policy.

use axum::http::{header, HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::config::CookieConfig;

/// Builds the session cookie. A lifetime of zero or less yields a browser
/// session cookie (no `Max-Age`); otherwise `Max-Age` is the whole number
/// of seconds in the lifetime.
pub fn session_cookie(
    config: &CookieConfig,
    name: &str,
    value: &str,
    lifetime: chrono::Duration,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .path(config.path())
        .http_only(true)
        .secure(config.secure);

    if let Some(same_site) = config.same_site {
        builder = builder.same_site(same_site);
    }

    if lifetime > chrono::Duration::zero() {
        builder = builder.max_age(time::Duration::seconds(lifetime.num_seconds()));
    }

    builder.build()
}

/// Cookie that instructs the browser to drop the session cookie.
pub fn expired_session_cookie(config: &CookieConfig, name: &str) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), String::new()))
        .path(config.path())
        .http_only(true)
        .secure(config.secure)
        .max_age(time::Duration::ZERO);

    if let Some(same_site) = config.same_site {
        builder = builder.same_site(same_site);
    }

    builder.build()
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Appends `Set-Cookie` headers; unencodable cookies are skipped.
pub fn append_cookies<'a>(headers: &mut HeaderMap, cookies: impl IntoIterator<Item = &'a Cookie<'static>>) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => {
                tracing::error!(cookie = %cookie.name(), error = %e, "Failed to encode cookie");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_extra::extract::cookie::SameSite;

    fn config() -> CookieConfig {
        CookieConfig {
            secure: true,
            same_site: Some(SameSite::Lax),
            sub_path: String::new(),
        }
    }

    #[test]
    fn test_session_cookie_with_lifetime() {
        let cookie = session_cookie(
            &config(),
            "auth_session",
            "abc",
            chrono::Duration::milliseconds(90_500),
        );
        let rendered = cookie.to_string();
        assert!(rendered.contains("auth_session=abc"));
        assert!(rendered.contains("Max-Age=90"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("SameSite=Lax"));
    }

    #[test]
    fn test_session_cookie_without_lifetime_has_no_max_age() {
        let cookie = session_cookie(&config(), "auth_session", "abc", chrono::Duration::zero());
        assert!(!cookie.to_string().contains("Max-Age"));
    }

    #[test]
    fn test_sub_path_is_used() {
        let mut config = config();
        config.sub_path = "/monitor".to_string();
        let cookie = expired_session_cookie(&config, "auth_session");
        assert_eq!(cookie.path(), Some("/monitor"));
        assert!(cookie.to_string().contains("Max-Age=0"));
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; auth_session=token123"),
        );
        assert_eq!(
            read_cookie(&headers, "auth_session").as_deref(),
            Some("token123")
        );
        assert_eq!(read_cookie(&headers, "missing"), None);
    }
}
