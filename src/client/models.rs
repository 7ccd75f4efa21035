//! Client-side value objects: origins, URLs, requests, responses.

use bytes::Bytes;

use crate::headers::{is_pseudo, lowercase, HeaderList};
use crate::{Error, Result};

fn default_port(scheme: &str) -> Result<u16> {
    match scheme {
        "http" => Ok(80),
        "https" => Ok(443),
        other => Err(Error::invalid_input(format!(
            "scheme is not supported: {other:?}"
        ))),
    }
}

fn parse_uri(value: &str, default_scheme: &str) -> Result<http::Uri> {
    let with_scheme;
    let value = if value.contains("://") {
        value
    } else {
        with_scheme = format!("{default_scheme}://{value}");
        &with_scheme
    };
    Ok(value.parse::<http::Uri>()?)
}

/// An HTTP origin server: the triple (scheme, host, port).
///
/// Origins are the key by which the connection pool groups connections.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Origin {
    /// Either `"http"` or `"https"`.
    pub scheme: String,
    /// A hostname or an IP address.
    pub host: String,
    /// A port number.
    pub port: u16,
}

impl Origin {
    /// Parses an origin from a string like `https://example.com:8443`.
    pub fn parse(value: &str) -> Result<Origin> {
        let uri = parse_uri(value, "http")?;
        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::invalid_input("origin must have a host"))?
            .to_string();
        if !matches!(uri.path(), "" | "/") {
            return Err(Error::invalid_input("origin must not have a path component"));
        }
        if uri.query().is_some() {
            return Err(Error::invalid_input(
                "origin must not have a query component",
            ));
        }
        let port = uri.port_u16().unwrap_or(default_port(&scheme)?);
        Ok(Origin { scheme, host, port })
    }

    /// Whether connections to this origin use TLS.
    #[inline]
    pub fn tls(&self) -> bool {
        self.scheme == "https"
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A URL, split into the parts the engine needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Url {
    /// Either `"http"` or `"https"`.
    pub scheme: String,
    /// A hostname or an IP address.
    pub host: String,
    /// A port number.
    pub port: u16,
    /// Path component including the query string, `"/"` at minimum.
    pub path: String,
}

impl Url {
    /// Parses a URL from a string. The scheme defaults to `http`.
    pub fn parse(value: &str) -> Result<Url> {
        let uri = parse_uri(value, "http")?;
        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::invalid_input("URL has no host"))?
            .to_string();
        let port = uri.port_u16().unwrap_or(default_port(&scheme)?);
        let mut path = match uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = uri.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Url {
            scheme,
            host,
            port,
            path,
        })
    }

    /// The HTTP server referenced by this URL.
    pub fn origin(&self) -> Origin {
        Origin {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// Authority part of this URL: the host, plus the port when it is not
    /// the scheme's default.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match default_port(&self.scheme) {
            Ok(default) if default == self.port => host,
            _ => format!("{host}:{}", self.port),
        }
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority(), self.path)
    }
}

/// An HTTP request.
#[derive(Clone, Debug)]
pub struct Request {
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: Url,
    /// Regular HTTP headers (names normalized to lowercase).
    pub headers: HeaderList,
    /// Request body.
    pub content: Bytes,
}

impl Request {
    /// Creates a request with no headers and no body.
    pub fn new(method: impl Into<String>, url: Url) -> Request {
        Request {
            method: method.into(),
            url,
            headers: Vec::new(),
            content: Bytes::new(),
        }
    }

    /// Creates a GET request from a URL string.
    pub fn get(url: &str) -> Result<Request> {
        Ok(Request::new("GET", Url::parse(url)?))
    }

    /// Sets the request body.
    pub fn with_content(mut self, content: impl Into<Bytes>) -> Request {
        self.content = content.into();
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> Request {
        let name: Bytes = name.into();
        self.headers.push((lowercase(&name), value.into()));
        self
    }

    /// The full header list including pseudo headers, ready to submit.
    pub fn protocol_headers(&self) -> HeaderList {
        let mut headers: HeaderList = vec![
            (
                Bytes::from_static(b":method"),
                Bytes::from(self.method.clone()),
            ),
            (
                Bytes::from_static(b":scheme"),
                Bytes::from(self.url.scheme.clone()),
            ),
            (
                Bytes::from_static(b":authority"),
                Bytes::from(self.url.authority()),
            ),
            (
                Bytes::from_static(b":path"),
                Bytes::from(self.url.path.clone()),
            ),
        ];
        headers.extend(self.headers.iter().cloned());
        headers
    }
}

/// An HTTP response.
#[derive(Clone, Debug, Default)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Regular HTTP headers.
    pub headers: HeaderList,
    /// Received body.
    pub content: Vec<u8>,
}

impl Response {
    /// Builds a response from received headers including the pseudo ones.
    pub fn from_headers(protocol_headers: &[crate::Header]) -> Result<Response> {
        let mut status = None;
        let mut headers: HeaderList = Vec::with_capacity(protocol_headers.len());
        for (name, value) in protocol_headers {
            if is_pseudo(name) {
                if name.as_ref() == b":status" {
                    status = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok());
                    if status.is_none() {
                        return Err(Error::invalid_input("invalid :status header"));
                    }
                } else {
                    return Err(Error::invalid_input(format!(
                        "invalid response header: {}",
                        String::from_utf8_lossy(name)
                    )));
                }
            } else {
                headers.push((name.clone(), value.clone()));
            }
        }
        Ok(Response {
            status: status
                .ok_or_else(|| Error::invalid_input("missing response header: :status"))?,
            headers,
            content: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::header;

    #[test]
    fn test_origin_parse() {
        let origin = Origin::parse("https://example.com").unwrap();
        assert_eq!(origin.scheme, "https");
        assert_eq!(origin.host, "example.com");
        assert_eq!(origin.port, 443);
        assert!(origin.tls());

        let origin = Origin::parse("localhost:8080").unwrap();
        assert_eq!(origin.scheme, "http");
        assert_eq!(origin.port, 8080);
        assert!(!origin.tls());
    }

    #[test]
    fn test_origin_rejects_path_and_query() {
        assert!(Origin::parse("http://example.com/path").is_err());
        assert!(Origin::parse("http://example.com/?q=1").is_err());
        assert!(Origin::parse("ftp://example.com").is_err());
    }

    #[test]
    fn test_url_parse() {
        let url = Url::parse("https://example.com:8443/index?q=1").unwrap();
        assert_eq!(url.scheme, "https");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 8443);
        assert_eq!(url.path, "/index?q=1");
        assert_eq!(url.authority(), "example.com:8443");
        assert_eq!(url.to_string(), "https://example.com:8443/index?q=1");
    }

    #[test]
    fn test_url_authority_omits_default_port() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(url.authority(), "example.com");
    }

    #[test]
    fn test_request_protocol_headers() {
        let request = Request::get("https://example.com").unwrap().with_header("Accept", "*/*");
        assert_eq!(
            request.protocol_headers(),
            vec![
                header(":method", "GET"),
                header(":scheme", "https"),
                header(":authority", "example.com"),
                header(":path", "/"),
                header("accept", "*/*"),
            ]
        );
    }

    #[test]
    fn test_response_from_headers() {
        let response = Response::from_headers(&[
            header(":status", "200"),
            header("content-length", "2"),
        ])
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers, vec![header("content-length", "2")]);

        assert!(Response::from_headers(&[header("content-length", "2")]).is_err());
        assert!(Response::from_headers(&[header(":status", "abc")]).is_err());
    }
}
