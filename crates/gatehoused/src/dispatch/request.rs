//! Decoded request snapshot handed to workers.
//!
//! Everything a content builder needs is extracted on the event loop thread:
//! the percent-decoded path, the raw query, the session cookies, the body,
//! and the multipart boundary when the body is `multipart/form-data`.

use http::Method;
use percent_encoding::percent_decode_str;

/// Query string that marks a POST as a JSON-RPC call.
pub const JSON_RPC_QUERY: &str = "mjsonrpc";

/// Route family a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Post,
    JsonRpc,
    /// Methods with no content path; answered with 501.
    Unroutable,
}

/// Session cookies recognised by the server.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Cookies {
    pub password: Option<String>,
    pub write_password: Option<String>,
    pub custom_password: Option<String>,
    /// Page refresh interval in seconds.
    pub refresh: Option<u32>,
}

impl Cookies {
    /// Parses a `Cookie` header value, ignoring unknown names.
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut cookies = Self::default();
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_owned();
            match name.trim() {
                "midas_pwd" => cookies.password = Some(value),
                "midas_wpwd" => cookies.write_password = Some(value),
                "cpwd" => cookies.custom_password = Some(value),
                "midas_refr" => cookies.refresh = value.parse().ok(),
                _ => {}
            }
        }
        cookies
    }
}

/// Immutable view of one parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    method: Method,
    uri: String,
    path: String,
    query: String,
    cookies: Cookies,
    body: Vec<u8>,
    boundary: Option<String>,
    username: Option<String>,
}

impl DecodedRequest {
    /// Decodes a request from its target, headers, and body.
    ///
    /// Header names are matched case-insensitively.
    #[must_use]
    pub fn decode(method: Method, target: &str, headers: &[(String, String)], body: Vec<u8>) -> Self {
        let (raw_path, query) = target.split_once('?').unwrap_or((target, ""));
        let path = percent_decode_str(raw_path).decode_utf8_lossy().into_owned();
        let header = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        };
        let cookies = header("cookie").map(Cookies::parse).unwrap_or_default();
        let boundary = header("content-type").and_then(multipart_boundary);
        Self {
            method,
            uri: target.to_owned(),
            path,
            query: query.to_owned(),
            cookies,
            body,
            boundary,
            username: None,
        }
    }

    /// Attaches the authenticated user.
    #[must_use]
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Classifies the request by method and query.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        if self.method == Method::GET {
            RequestKind::Get
        } else if self.method == Method::POST {
            if self.query == JSON_RPC_QUERY {
                RequestKind::JsonRpc
            } else {
                RequestKind::Post
            }
        } else {
            RequestKind::Unroutable
        }
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Request target exactly as received.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Percent-decoded path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub const fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Multipart boundary, when the body is `multipart/form-data`.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// Authenticated user, when digest authentication is enabled.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    let media = parts.next()?.trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    parts.find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[rstest]
    #[case(Method::GET, "", RequestKind::Get)]
    #[case(Method::POST, "", RequestKind::Post)]
    #[case(Method::POST, "mjsonrpc", RequestKind::JsonRpc)]
    #[case(Method::GET, "mjsonrpc", RequestKind::Get)]
    #[case(Method::PUT, "", RequestKind::Unroutable)]
    #[case(Method::HEAD, "", RequestKind::Unroutable)]
    fn classifies_by_method_and_query(
        #[case] method: Method,
        #[case] query: &str,
        #[case] expected: RequestKind,
    ) {
        let target = if query.is_empty() {
            "/".to_owned()
        } else {
            format!("/?{query}")
        };
        let request = DecodedRequest::decode(method, &target, &[], Vec::new());
        assert_eq!(request.kind(), expected);
    }

    #[rstest]
    fn decodes_path_and_keeps_raw_query() {
        let request =
            DecodedRequest::decode(Method::GET, "/odb/Run%20Info/State?cmd=a%20b", &[], Vec::new());
        assert_eq!(request.path(), "/odb/Run Info/State");
        assert_eq!(request.query(), "cmd=a%20b");
        assert_eq!(request.uri(), "/odb/Run%20Info/State?cmd=a%20b");
    }

    #[rstest]
    fn extracts_known_cookies() {
        let request = DecodedRequest::decode(
            Method::GET,
            "/",
            &headers(&[(
                "Cookie",
                "midas_pwd=abc; midas_wpwd=def; cpwd=\"ghi\"; midas_refr=30; theme=dark",
            )]),
            Vec::new(),
        );
        assert_eq!(
            request.cookies(),
            &Cookies {
                password: Some("abc".to_owned()),
                write_password: Some("def".to_owned()),
                custom_password: Some("ghi".to_owned()),
                refresh: Some(30),
            }
        );
    }

    #[rstest]
    #[case("multipart/form-data; boundary=----xyz", Some("----xyz"))]
    #[case("Multipart/Form-Data; charset=utf-8; boundary=\"b1\"", Some("b1"))]
    #[case("application/json", None)]
    fn extracts_multipart_boundary(#[case] content_type: &str, #[case] expected: Option<&str>) {
        let request = DecodedRequest::decode(
            Method::POST,
            "/upload",
            &headers(&[("content-type", content_type)]),
            b"payload".to_vec(),
        );
        assert_eq!(request.boundary(), expected);
    }
}
