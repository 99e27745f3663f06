//! Session cookies
//!
//! `Set-Cookie` values for the access/refresh pair and lookup of cookies
//! sent back by the client.

use axum::http::{header, HeaderMap};
use std::time::Duration;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Cookie attributes shared by every session cookie
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub access_max_age: Duration,
    pub refresh_max_age: Duration,
}

impl CookieSettings {
    pub fn new(secure: bool, access_max_age: Duration, refresh_max_age: Duration) -> Self {
        Self {
            secure,
            access_max_age,
            refresh_max_age,
        }
    }

    /// `Set-Cookie` values carrying a freshly minted token pair
    pub fn session(&self, access_token: &str, refresh_token: &str) -> [String; 2] {
        [
            self.build(ACCESS_COOKIE, access_token, self.access_max_age),
            self.build(REFRESH_COOKIE, refresh_token, self.refresh_max_age),
        ]
    }

    /// `Set-Cookie` values that make the client drop both cookies
    pub fn cleared(&self) -> [String; 2] {
        [
            self.build(ACCESS_COOKIE, "", Duration::ZERO),
            self.build(REFRESH_COOKIE, "", Duration::ZERO),
        ]
    }

    fn build(&self, name: &str, value: &str, max_age: Duration) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            name,
            value,
            max_age.as_secs()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Value of cookie `name` from the request's `Cookie` headers, if non-empty
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn settings(secure: bool) -> CookieSettings {
        CookieSettings::new(secure, Duration::from_secs(900), Duration::from_secs(86400))
    }

    #[test]
    fn test_session_cookies_use_own_ttls() {
        let [access, refresh] = settings(false).session("a.b.c", "r1");
        assert_eq!(
            access,
            "access_token=a.b.c; Path=/; Max-Age=900; HttpOnly; SameSite=Lax"
        );
        assert_eq!(
            refresh,
            "refresh_token=r1; Path=/; Max-Age=86400; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn test_secure_flag() {
        let [access, _] = settings(true).session("a", "r");
        assert!(access.ends_with("; Secure"));
    }

    #[test]
    fn test_cleared_cookies_expire_immediately() {
        for cookie in settings(false).cleared() {
            assert!(cookie.contains("Max-Age=0"));
            assert!(cookie.contains("Path=/"));
        }
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; refresh_token=abc-_1"));
        headers.append(header::COOKIE, HeaderValue::from_static("access_token=x.y.z"));

        assert_eq!(read_cookie(&headers, REFRESH_COOKIE).as_deref(), Some("abc-_1"));
        assert_eq!(read_cookie(&headers, ACCESS_COOKIE).as_deref(), Some("x.y.z"));
        assert_eq!(read_cookie(&headers, "missing"), None);

        let mut empty = HeaderMap::new();
        empty.insert(header::COOKIE, HeaderValue::from_static("refresh_token="));
        assert_eq!(read_cookie(&empty, REFRESH_COOKIE), None);
    }
}
