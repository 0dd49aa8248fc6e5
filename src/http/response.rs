/// An HTTP status code.
///
/// Relayed responses carry whatever code the backend produced, so this is a
/// thin wrapper over the numeric value with constants for the codes the
/// server generates itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);

    pub const fn from_u16(code: u16) -> Self {
        StatusCode(code)
    }

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use waypoint::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::from_u16(418).as_u16(), 418);
    /// ```
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Informational (1xx) codes.
    pub const fn is_informational(&self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    /// Whether a response with this status may carry a body.
    pub const fn allows_body(&self) -> bool {
        !(self.is_informational() || self.0 == 204 || self.0 == 304)
    }

    /// Returns the standard reason phrase, or an empty string for codes
    /// without a registered phrase.
    ///
    /// # Example
    ///
    /// ```
    /// # use waypoint::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            413 => "Payload Too Large",
            415 => "Unsupported Media Type",
            422 => "Unprocessable Content",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "",
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

/// A complete HTTP response generated by the server itself (errors and
/// the default for unrouted requests). Relayed responses never take this
/// shape; they are streamed.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Headers in write order
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "text/plain")
///     .body(b"ok".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header, replacing any earlier one with the same name.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
        self.headers.push((key, value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header from the body size if not already present.
    pub fn build(mut self) -> Response {
        if !self
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        {
            self.headers
                .push(("Content-Length".to_string(), self.body.len().to_string()));
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Plain-text response whose body is the status line text.
    pub fn plain(status: StatusCode) -> Self {
        let body = format!("{} {}\n", status.as_u16(), status.reason_phrase());
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .body(body.into_bytes())
            .build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        Self::plain(StatusCode::NOT_FOUND)
    }
}
