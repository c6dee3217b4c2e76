//! Request and response values passed between the fetch seam, the
//! strategies and the cache store.
//!
//! Header names are normalised to lower case on the way in so lookups
//! never depend on the casing a server or page used.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::Result;

pub const ACCEPT: &str = "accept";
pub const CACHE_CONTROL: &str = "cache-control";
pub const CONTENT_TYPE: &str = "content-type";

/// Marks where a worker-produced response came from (`cache` or `offline`).
pub const X_SERVED_FROM: &str = "x-served-from";

pub type Headers = BTreeMap<String, String>;

/// Cache key for a URL. Fragments never reach the network, so they are
/// not part of the key either.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn accept(&self) -> Option<&str> {
        self.header(ACCEPT)
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Build a response from an already-normalised header map.
    pub fn from_parts(status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into()).with_header(CONTENT_TYPE, "text/plain; charset=utf-8")
    }

    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into()).with_header(CONTENT_TYPE, "text/html; charset=utf-8")
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header(CONTENT_TYPE, "application/json")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// 2xx, mirroring `Response.ok`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (u16, Headers, Vec<u8>) {
        (self.status, self.headers, self.body)
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_drops_fragment() {
        let url = Url::parse("https://openpiimap.org/index.html#germany").unwrap();
        assert_eq!(cache_key(&url), "https://openpiimap.org/index.html");
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let request = Request::get(Url::parse("https://openpiimap.org/").unwrap())
            .with_header("Accept", "text/html");
        assert_eq!(request.accept(), Some("text/html"));
        assert_eq!(request.header("ACCEPT"), Some("text/html"));

        let response = Response::new(200, "ok").with_header("X-Served-From", "cache");
        assert_eq!(response.header(X_SERVED_FROM), Some("cache"));
    }

    #[test]
    fn test_is_success_range() {
        assert!(Response::new(200, "").is_success());
        assert!(Response::new(204, "").is_success());
        assert!(!Response::new(304, "").is_success());
        assert!(!Response::new(404, "").is_success());
        assert!(!Response::new(503, "").is_success());
    }

    #[test]
    fn test_json_response() {
        let response = Response::json(503, &serde_json::json!({"cached": false}));
        assert_eq!(response.content_type(), Some("application/json"));
        let value: serde_json::Value = response.json_body().unwrap();
        assert_eq!(value["cached"], false);
    }
}
