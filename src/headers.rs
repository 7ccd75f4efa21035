//! Header list conventions shared by all protocol versions.
//!
//! Headers are ordered sequences of `(name, value)` byte-string pairs.
//! Pseudo headers (names starting with `:`) come first and carry
//! method/scheme/authority/path for requests and status for responses.
//! Regular names are normalized to lowercase internally; HTTP/1
//! serialization restores a canonical capitalization.

use bytes::Bytes;

/// One HTTP header: a `(name, value)` pair of byte strings.
pub type Header = (Bytes, Bytes);

/// An ordered list of HTTP headers, pseudo headers first.
pub type HeaderList = Vec<Header>;

/// Builds a [`Header`] from anything byte-like. Mostly useful in tests.
#[inline]
pub fn header(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Header {
    (name.into(), value.into())
}

/// Whether the name belongs to a pseudo header.
#[inline]
pub fn is_pseudo(name: &[u8]) -> bool {
    name.first() == Some(&b':')
}

/// Returns the value of the first header with the given name.
///
/// Names are compared case-insensitively.
pub fn find<'a>(headers: &'a [Header], name: &[u8]) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_ref())
}

/// Whether a header with the given name is present.
#[inline]
pub fn contains(headers: &[Header], name: &[u8]) -> bool {
    find(headers, name).is_some()
}

/// Returns a copy of the headers with all names lowercased.
pub fn normalize(headers: &[Header]) -> HeaderList {
    headers
        .iter()
        .map(|(name, value)| (lowercase(name), value.clone()))
        .collect()
}

/// Lowercases a header name, avoiding a copy when already lowercase.
pub fn lowercase(name: &Bytes) -> Bytes {
    if name.iter().any(u8::is_ascii_uppercase) {
        Bytes::from(name.to_ascii_lowercase())
    } else {
        name.clone()
    }
}

/// Splits a header list into pseudo headers and regular headers.
///
/// Names of regular headers are lowercased; pseudo names are kept verbatim.
pub fn split_pseudo(headers: &[Header]) -> (HeaderList, HeaderList) {
    let mut pseudo = Vec::new();
    let mut regular = Vec::new();
    for (name, value) in headers {
        if is_pseudo(name) {
            pseudo.push((name.clone(), value.clone()));
        } else {
            regular.push((lowercase(name), value.clone()));
        }
    }
    (pseudo, regular)
}

// Field-name words whose canonical form is not a simple capitalization.
// https://www.iana.org/assignments/http-fields/http-fields.xhtml
fn canonical_word(word: &[u8]) -> Option<&'static [u8]> {
    let known: &[(&[u8], &[u8])] = &[
        (b"alpn", b"ALPN"),
        (b"amp", b"AMP"),
        (b"caldav", b"CalDAV"),
        (b"cdn", b"CDN"),
        (b"ch", b"CH"),
        (b"ct", b"CT"),
        (b"dasl", b"DASL"),
        (b"dav", b"DAV"),
        (b"dns", b"DNS"),
        (b"dpr", b"DPR"),
        (b"ect", b"ECT"),
        (b"ediint", b"EDIINT"),
        (b"etag", b"ETag"),
        (b"gpc", b"GPC"),
        (b"http2", b"HTTP2"),
        (b"id", b"ID"),
        (b"im", b"IM"),
        (b"md5", b"MD5"),
        (b"mime", b"MIME"),
        (b"nel", b"NEL"),
        (b"odata", b"OData"),
        (b"oscore", b"OSCORE"),
        (b"oslc", b"OSLC"),
        (b"p3p", b"P3P"),
        (b"pep", b"PEP"),
        (b"pics", b"PICS"),
        (b"rtt", b"RTT"),
        (b"slug", b"SLUG"),
        (b"soapaction", b"SoapAction"),
        (b"sourcemap", b"SourceMap"),
        (b"tcn", b"TCN"),
        (b"te", b"TE"),
        (b"ttl", b"TTL"),
        (b"ua", b"UA"),
        (b"uri", b"URI"),
        (b"websocket", b"WebSocket"),
        (b"www", b"WWW"),
    ];
    known
        .iter()
        .find(|(lower, _)| *lower == word)
        .map(|(_, canonical)| *canonical)
}

/// Converts a field name to the capitalization commonly seen on the wire.
///
/// Header names are case-insensitive, but HTTP/1.1 peers conventionally send
/// them capitalized per dash-separated word (`Content-Length`), with a few
/// registered exceptions (`ETag`, `TE`, `WWW-Authenticate`).
pub fn canonical_name(name: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(name.len());
    for (i, word) in name.to_ascii_lowercase().split(|b| *b == b'-').enumerate() {
        if i > 0 {
            out.push(b'-');
        }
        match canonical_word(word) {
            Some(canonical) => out.extend_from_slice(canonical),
            None => {
                let start = out.len();
                out.extend_from_slice(word);
                if let Some(first) = out.get_mut(start) {
                    first.make_ascii_uppercase();
                }
            }
        }
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name(b"host"), "Host");
        assert_eq!(canonical_name(b"content-length"), "Content-Length");
        assert_eq!(canonical_name(b"TRANSFER-ENCODING"), "Transfer-Encoding");
        assert_eq!(canonical_name(b"etag"), "ETag");
        assert_eq!(canonical_name(b"www-authenticate"), "WWW-Authenticate");
        assert_eq!(canonical_name(b"te"), "TE");
        assert_eq!(canonical_name(b"x-forwarded-for"), "X-Forwarded-For");
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let headers = vec![header("Content-Length", "11"), header("host", "a")];
        assert_eq!(find(&headers, b"content-length"), Some(&b"11"[..]));
        assert_eq!(find(&headers, b"Host"), Some(&b"a"[..]));
        assert_eq!(find(&headers, b"cookie"), None);
    }

    #[test]
    fn test_split_pseudo() {
        let headers = vec![
            header(":method", "GET"),
            header(":path", "/"),
            header("Accept", "*/*"),
        ];
        let (pseudo, regular) = split_pseudo(&headers);
        assert_eq!(pseudo, vec![header(":method", "GET"), header(":path", "/")]);
        assert_eq!(regular, vec![header("accept", "*/*")]);
    }
}
