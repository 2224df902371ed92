use std::sync::OnceLock;

use axum::http::{header, HeaderMap};
use rand::distr::Alphanumeric;
use rand::Rng;

pub const TOKEN_LEN: usize = 15;
pub const COOKIE_NAME: &str = "token";

/// Per-process secrets: the request token travels in JSON bodies and the
/// `/event` query string, the cookie token in the `Cookie` header.
///
/// The cookie token is minted on the first static-file request and never
/// re-issued afterwards.
#[derive(Debug)]
pub struct SessionCredential {
    request_token: String,
    cookie_token: OnceLock<String>,
}

impl SessionCredential {
    pub fn generate() -> Self {
        Self {
            request_token: random_token(),
            cookie_token: OnceLock::new(),
        }
    }

    pub fn request_token(&self) -> &str {
        &self.request_token
    }

    pub fn cookie_token(&self) -> Option<&str> {
        self.cookie_token.get().map(String::as_str)
    }

    /// Mints the cookie token if nobody has yet. Only the caller that minted
    /// it gets the token back, so it is sent in exactly one response.
    pub fn mint_cookie(&self) -> Option<&str> {
        let mut minted = false;
        let token = self.cookie_token.get_or_init(|| {
            minted = true;
            random_token()
        });
        minted.then_some(token.as_str())
    }

    pub fn set_cookie_value(token: &str) -> String {
        format!("{COOKIE_NAME}={token}; Path=/; SameSite=Strict")
    }

    pub fn request_token_matches(&self, candidate: Option<&str>) -> bool {
        candidate == Some(self.request_token.as_str())
    }

    /// `id=<requestToken>` and nothing else.
    pub fn event_query_matches(&self, raw_query: Option<&str>) -> bool {
        raw_query
            .and_then(|query| query.strip_prefix("id="))
            .is_some_and(|token| token == self.request_token)
    }

    pub fn cookie_header_matches(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.cookie_token() else {
            return false;
        };
        extract_cookie(headers, COOKIE_NAME).as_deref() == Some(expected)
    }
}

fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn extract_cookie(headers: &HeaderMap, key: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(cookies) = value.to_str() else {
            continue;
        };
        for chunk in cookies.split(';') {
            let mut parts = chunk.trim().splitn(2, '=');
            let name = parts.next().unwrap_or("").trim();
            let value = parts.next().unwrap_or("").trim();
            if name == key {
                return Some(value.to_string());
            }
        }
    }
    None
}
