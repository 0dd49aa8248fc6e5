use std::borrow::Cow;

use bytes::Bytes;

/// HTTP request methods.
///
/// The common verbs get their own variant; anything else that is a valid
/// token is carried as an extension method so it can be proxied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other method token (e.g. `PROPFIND`, `PURGE`)
    Extension(String),
}

/// Represents a parsed HTTP request from a client.
///
/// `path` is the percent-decoded path component of the request target,
/// kept as bytes since `%FF` and friends need not decode to UTF-8;
/// `query` is the raw query string exactly as the client sent it.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method
    pub method: Method,
    /// Decoded request path (e.g. b"/api/my file")
    pub path: Bytes,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Request headers in the order received, duplicates kept. Names are
    /// tokens; values are the raw field bytes.
    pub headers: Vec<(String, Bytes)>,
    /// Request body
    pub body: Bytes,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<Bytes>,
    query: Option<String>,
    version: Option<String>,
    headers: Vec<(String, Bytes)>,
    body: Bytes,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Method names are case-sensitive. Unknown names are accepted as
    /// [`Method::Extension`] as long as they are a valid token.
    ///
    /// # Example
    ///
    /// ```
    /// # use waypoint::http::request::Method;
    /// assert_eq!(Method::parse("GET"), Some(Method::GET));
    /// assert_eq!(Method::parse("PURGE"), Some(Method::Extension("PURGE".into())));
    /// assert_eq!(Method::parse("BAD METHOD"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let method = match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other if is_token(other) => Method::Extension(other.to_string()),
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Extension(name) => name.as_str(),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 9110 `token`: one or more tchars.
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
                        | b'^' | b'_' | b'`' | b'|' | b'~'
                )
        })
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            query: None,
            version: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl AsRef<[u8]>) -> Self {
        self.path = Some(Bytes::copy_from_slice(path.as_ref()));
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Appends a header. Repeated names are kept as separate entries.
    pub fn header(mut self, key: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.headers
            .push((key.into(), Bytes::copy_from_slice(value.as_ref())));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: self.path.ok_or("path missing")?,
            query: self.query,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
        })
    }
}

impl Request {
    /// Retrieves the first header value with the given name (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_ref())
    }

    /// The decoded path for log output; invalid UTF-8 is replaced.
    pub fn path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    /// Number of body bytes carried by this request.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent;
    /// HTTP/1.0 only keeps the connection with an explicit `keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("Connection");
        if self.is_http11() {
            !connection.is_some_and(|v| has_token(v, "close"))
        } else {
            connection.is_some_and(|v| has_token(v, "keep-alive"))
        }
    }

    pub fn is_http11(&self) -> bool {
        self.version == "HTTP/1.1"
    }
}

fn has_token(value: &[u8], token: &str) -> bool {
    value
        .split(|&b| b == b',')
        .any(|part| part.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
}
