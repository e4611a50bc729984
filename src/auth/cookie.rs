//! `auth_token` cookie handling.

use axum::http::{header, HeaderMap};

use super::token::SESSION_TTL_SECS;

pub const SESSION_COOKIE: &str = "auth_token";

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: &str, secure: bool) -> String {
    build(token, SESSION_TTL_SECS, secure)
}

/// `Set-Cookie` value that expires the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    build("", 0, secure)
}

fn build(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={value}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Session token from the request's `Cookie` headers.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| find_cookie(raw, SESSION_COOKIE))
        .map(str::to_string)
}

fn find_cookie<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_reads_token_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=abc.def.ghi; lang=en"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_missing_or_empty_cookie() {
        let mut headers = HeaderMap::new();
        assert!(session_token(&headers).is_none());
        headers.insert(header::COOKIE, HeaderValue::from_static("auth_token="));
        assert!(session_token(&headers).is_none());
    }

    #[test]
    fn test_cookie_attributes() {
        let set = session_cookie("tok", true);
        assert!(set.starts_with("auth_token=tok;"));
        assert!(set.contains("Max-Age=604800"));
        assert!(set.ends_with("; Secure"));

        let clear = clear_session_cookie(false);
        assert!(clear.contains("Max-Age=0"));
        assert!(!clear.contains("Secure"));
    }
}
