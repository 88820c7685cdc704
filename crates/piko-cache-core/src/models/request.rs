use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request as seen by the fetch interceptor.
///
/// `url` is the request identifier. It may be relative (`./index.html`);
/// the network resolves it, the cache keys on it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: String,
}

impl Request {
    /// A GET request for the given identifier.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
        }
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    /// Whether a stored response may answer this request.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::Get
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_get_is_cacheable() {
        assert!(Request::get("./").is_cacheable());
        assert!(!Request::new(Method::Post, "./api/orders").is_cacheable());
        assert!(!Request::new(Method::Head, "./").is_cacheable());
    }

    #[test]
    fn test_request_display() {
        assert_eq!(Request::get("./index.html").to_string(), "GET ./index.html");
    }
}
