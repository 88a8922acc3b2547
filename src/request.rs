use std::{fmt, str::FromStr};

use serde_json::Value;
use url::Url;

/// Standard HTTP request methods.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Head => Self::HEAD,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Delete => Self::DELETE,
            Method::Connect => Self::CONNECT,
            Method::Options => Self::OPTIONS,
            Method::Trace => Self::TRACE,
            Method::Patch => Self::PATCH,
        }
    }
}

impl FromStr for Method {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "CONNECT" => Self::Connect,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "PATCH" => Self::Patch,
            _ => return Err(RequestError::Method(s.to_string())),
        })
    }
}

/// Reasons a probe request is rejected before anything is sent.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestError {
    /// The url was empty.
    EmptyUrl,
    /// The url could not be parsed as an absolute URI.
    InvalidUrl(String),
    /// The url scheme does not match the probe mode.
    Scheme {
        /// Scheme found in the url.
        got: String,
        /// Schemes accepted by the probe mode.
        expected: &'static [&'static str],
    },
    /// The url has no host to connect to.
    MissingHost,
    /// Not one of the standard HTTP verbs.
    Method(String),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyUrl => f.write_str("url is empty"),
            Self::InvalidUrl(e) => write!(f, "invalid url: {e}"),
            Self::Scheme { got, expected } => {
                write!(f, "unsupported scheme {got:?}, expected one of {expected:?}")
            }
            Self::MissingHost => f.write_str("url has no host"),
            Self::Method(m) => write!(f, "unsupported HTTP method {m:?}"),
        }
    }
}

impl std::error::Error for RequestError {}

fn parse_url(url: &str, expected: &'static [&'static str]) -> Result<Url, RequestError> {
    if url.trim().is_empty() {
        return Err(RequestError::EmptyUrl);
    }
    let url = Url::parse(url).map_err(|e| RequestError::InvalidUrl(e.to_string()))?;
    if !expected.contains(&url.scheme()) {
        return Err(RequestError::Scheme {
            got: url.scheme().to_string(),
            expected,
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(RequestError::MissingHost);
    }
    Ok(url)
}

/// One HTTP request with a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpProbeRequest {
    pub(crate) url: Url,
    pub(crate) method: Method,
    pub(crate) body: Value,
}

impl HttpProbeRequest {
    pub fn new(url: &str, method: Method, body: Value) -> Result<Self, RequestError> {
        Ok(Self {
            url: parse_url(url, &["http", "https"])?,
            method,
            body,
        })
    }

    /// `POST` with `body`, the shape of the create-game call.
    pub fn post(url: &str, body: Value) -> Result<Self, RequestError> {
        Self::new(url, Method::Post, body)
    }

    #[must_use]
    pub fn url(&self) -> &Url { &self.url }

    #[must_use]
    pub fn method(&self) -> Method { self.method }

    #[must_use]
    pub fn body(&self) -> &Value { &self.body }
}

/// One WebSocket session that sends `initial_message` once after opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsProbeRequest {
    pub(crate) url: Url,
    pub(crate) initial_message: String,
}

impl WsProbeRequest {
    pub fn new(url: &str, initial_message: impl Into<String>) -> Result<Self, RequestError> {
        Ok(Self {
            url: parse_url(url, &["ws", "wss"])?,
            initial_message: initial_message.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url { &self.url }

    #[must_use]
    pub fn initial_message(&self) -> &str { &self.initial_message }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeRequest {
    Http(HttpProbeRequest),
    Ws(WsProbeRequest),
}

impl From<HttpProbeRequest> for ProbeRequest {
    fn from(req: HttpProbeRequest) -> Self { Self::Http(req) }
}

impl From<WsProbeRequest> for ProbeRequest {
    fn from(req: WsProbeRequest) -> Self { Self::Ws(req) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_observed_urls() {
        let req = HttpProbeRequest::post(
            "http://localhost:8000/create-game",
            json!({"owner": "dsch", "number_people": 8}),
        )
        .unwrap();
        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.url().path(), "/create-game");

        let req = WsProbeRequest::new("ws://127.0.0.1:8000/ws", "Hello from Node 22!").unwrap();
        assert_eq!(req.initial_message(), "Hello from Node 22!");
    }

    #[test]
    fn rejects_empty_and_relative_urls() {
        assert_eq!(
            HttpProbeRequest::post("", Value::Null),
            Err(RequestError::EmptyUrl)
        );
        assert!(matches!(
            WsProbeRequest::new("/ws", ""),
            Err(RequestError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_scheme_of_the_other_mode() {
        assert!(matches!(
            HttpProbeRequest::post("ws://localhost/ws", Value::Null),
            Err(RequestError::Scheme { .. })
        ));
        assert!(matches!(
            WsProbeRequest::new("https://localhost/", "hi"),
            Err(RequestError::Scheme { .. })
        ));
    }

    #[test]
    fn parses_methods_case_insensitively() {
        assert_eq!("post".parse::<Method>(), Ok(Method::Post));
        assert_eq!("PATCH".parse::<Method>(), Ok(Method::Patch));
        assert_eq!(
            "FETCH".parse::<Method>(),
            Err(RequestError::Method("FETCH".to_string()))
        );
    }
}
