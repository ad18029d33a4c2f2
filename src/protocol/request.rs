use std::cell::OnceCell;

use http::uri::Uri;
use http::{Method, Version};
use indexmap::IndexMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::fields::{self, contains_ignore_case, FieldMap, ListConverter, StringConverter};
use crate::protocol::message::MessageHead;
use crate::protocol::response::HttpResponse;

/// Decoded query data: key to ordered list of values, keys in first-seen
/// order, duplicate keys preserved as additional list entries.
pub type QueryData = IndexMap<String, Vec<String>>;

// application/x-www-form-urlencoded: everything except unreserved marks is
// percent-encoded; the space becomes '+' in a separate pass.
const FORM_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b' ')
    .remove(b'.')
    .remove(b'-')
    .remove(b'*')
    .remove(b'_');

/// An HTTP request header.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    protocol: Version,
    fields: FieldMap,
    has_payload: bool,
    host: Option<String>,
    port: Option<u16>,
    response: Option<Box<HttpResponse>>,
    decoded_query: OnceCell<QueryData>,
}

impl HttpRequest {
    /// Creates a new request. The effective [`host`](Self::host) and
    /// [`port`](Self::port) start out as the request-URI's authority and
    /// stay mutable until the header is emitted.
    pub fn new(method: Method, uri: Uri, protocol: Version, has_payload: bool) -> Self {
        let host = uri.host().map(str::to_owned);
        let port = uri.port_u16();
        Self {
            method,
            uri,
            protocol,
            fields: FieldMap::new(),
            has_payload,
            host,
            port,
            response: None,
            decoded_query: OnceCell::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
        self.decoded_query = OnceCell::new();
    }

    /// The effective host, defaulting to the request-URI's authority.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The effective port; `None` means the default port for the scheme.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn set_host_port(&mut self, host: impl Into<String>, port: Option<u16>) -> &mut Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    /// Associates the request with a response. Invoked by the request
    /// decoder, which prepares a 501 "Not Implemented" response carrying
    /// over the request protocol.
    pub fn set_response(&mut self, response: HttpResponse) -> &mut Self {
        self.response = Some(Box::new(response));
        self
    }

    /// The prepared response, if any.
    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_deref()
    }

    pub fn response_mut(&mut self) -> Option<&mut HttpResponse> {
        self.response.as_deref_mut()
    }

    pub fn take_response(&mut self) -> Option<HttpResponse> {
        self.response.take().map(|boxed| *boxed)
    }

    /// Whether the request asks for a `100 Continue` interim response
    /// before the payload is sent.
    pub fn expects_continue(&self) -> bool {
        let expectations = self
            .fields
            .get_typed(fields::EXPECT, &ListConverter::new(StringConverter))
            .unwrap_or_default()
            .unwrap_or_default();
        contains_ignore_case(&expectations, "100-continue")
    }

    /// Whether the connection may be kept open after this exchange:
    /// HTTP/1.1 unless `Connection: close`, HTTP/1.0 only with
    /// `Connection: keep-alive`.
    pub fn persistent_connection(&self) -> bool {
        let connection = self
            .fields
            .get_typed(fields::CONNECTION, &ListConverter::new(StringConverter))
            .unwrap_or_default()
            .unwrap_or_default();
        match self.protocol {
            Version::HTTP_11 => !contains_ignore_case(&connection, "close"),
            _ => contains_ignore_case(&connection, "keep-alive"),
        }
    }

    /// The request-URI's query decoded into an ordered key to value-list
    /// map. Computed on first access and cached; the cache is reset when
    /// the URI is replaced.
    pub fn query_data(&self) -> &QueryData {
        self.decoded_query.get_or_init(|| {
            let mut data = QueryData::new();
            let Some(query) = self.uri.query() else {
                return data;
            };
            for pair in query.split('&') {
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = match pair.split_once('=') {
                    Some((key, value)) => (key, value),
                    None => (pair, ""),
                };
                data.entry(www_form_urldecode(key))
                    .or_default()
                    .push(www_form_urldecode(value));
            }
            data
        })
    }

    /// Replaces the request-URI's query with the urlencoded `data`.
    pub fn set_query_data(&mut self, data: &QueryData) -> &mut Self {
        self.set_uri(replace_query(&self.uri, &www_form_urlencode(data)));
        self
    }

    /// Replaces the request-URI's query with the urlencoded single-valued
    /// `data`.
    pub fn set_simple_query_data(&mut self, data: &IndexMap<String, String>) -> &mut Self {
        self.set_uri(replace_query(&self.uri, &simple_www_form_urlencode(data)));
        self
    }
}

impl MessageHead for HttpRequest {
    fn protocol(&self) -> Version {
        self.protocol
    }

    fn fields(&self) -> &FieldMap {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut FieldMap {
        &mut self.fields
    }

    fn has_payload(&self) -> bool {
        self.has_payload
    }

    fn set_has_payload(&mut self, has_payload: bool) {
        self.has_payload = has_payload;
    }
}

fn form_encode_component(text: &str) -> String {
    utf8_percent_encode(text, FORM_ENCODE).to_string().replace(' ', "+")
}

fn www_form_urldecode(text: &str) -> String {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Percent-encodes `data` per `application/x-www-form-urlencoded`,
/// iterating keys in insertion order and preserving duplicate keys as
/// repeated `key=value` pairs.
pub fn www_form_urlencode(data: &QueryData) -> String {
    let mut pairs = Vec::new();
    for (key, values) in data {
        for value in values {
            pairs.push(format!("{}={}", form_encode_component(key), form_encode_component(value)));
        }
    }
    pairs.join("&")
}

/// Like [`www_form_urlencode`] for single-valued maps.
pub fn simple_www_form_urlencode(data: &IndexMap<String, String>) -> String {
    data.iter()
        .map(|(key, value)| format!("{}={}", form_encode_component(key), form_encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns `uri` with its query replaced by `query` (in raw form), keeping
/// scheme, authority and path. A blank query inserts no `?`.
pub fn replace_query(uri: &Uri, query: &str) -> Uri {
    let mut parts = uri.clone().into_parts();
    let path = match uri.path() {
        "" => "/",
        path => path,
    };
    let path_and_query = if query.is_empty() {
        path.to_owned()
    } else {
        format!("{path}?{query}")
    };
    parts.path_and_query = path_and_query.parse().ok();
    Uri::from_parts(parts).unwrap_or_else(|_| uri.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> HttpRequest {
        HttpRequest::new(Method::GET, uri.parse().unwrap(), Version::HTTP_11, false)
    }

    #[test]
    fn host_and_port_default_to_uri_authority() {
        let req = request("http://example.com:8080/path");
        assert_eq!(req.host(), Some("example.com"));
        assert_eq!(req.port(), Some(8080));

        let mut req = request("/path");
        assert_eq!(req.host(), None);
        req.set_host_port("example.com", None);
        assert_eq!(req.host(), Some("example.com"));
        assert_eq!(req.port(), None);
    }

    #[test]
    fn query_data_ordered_and_decoded() {
        let req = request("/index?a=1&b=2&a=3&sp=v%C3%A4l+ue");
        let data = req.query_data();
        let keys: Vec<_> = data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "sp"]);
        assert_eq!(data["a"], vec!["1", "3"]);
        assert_eq!(data["sp"], vec!["väl ue"]);
    }

    #[test]
    fn query_data_empty_and_flag_pairs() {
        let req = request("/index?a&b=");
        let data = req.query_data();
        assert_eq!(data["a"], vec![""]);
        assert_eq!(data["b"], vec![""]);
        assert!(request("/index").query_data().is_empty());
    }

    #[test]
    fn form_urlencode_insertion_order() {
        let mut data = QueryData::new();
        data.insert("first".into(), vec!["value1.1".into(), "value1.2".into()]);
        data.insert("second".into(), vec!["value2".into()]);
        data.insert("third".into(), vec!["välue3".into()]);
        assert_eq!(
            www_form_urlencode(&data),
            "first=value1.1&first=value1.2&second=value2&third=v%C3%A4lue3"
        );
    }

    #[test]
    fn simple_form_urlencode_uses_plus_for_space() {
        let mut data = IndexMap::new();
        data.insert("first".to_owned(), "&value 1".to_owned());
        data.insert("second".to_owned(), "value2".to_owned());
        assert_eq!(simple_www_form_urlencode(&data), "first=%26value+1&second=value2");
    }

    #[test]
    fn urlencode_decode_round_trip() {
        let mut data = QueryData::new();
        data.insert("k e y".into(), vec!["a&b".into(), "+".into()]);
        data.insert("plain".into(), vec!["x".into()]);
        let mut req = request("/path");
        req.set_query_data(&data);
        assert_eq!(req.query_data(), &data);
    }

    #[test]
    fn replace_query_preserves_uri_parts() {
        let uri: Uri = "http://test.com/path?k=v".parse().unwrap();
        let replaced = replace_query(&uri, "first=1&second=2");
        assert_eq!(replaced.to_string(), "http://test.com/path?first=1&second=2");
        let cleared = replace_query(&uri, "");
        assert_eq!(cleared.to_string(), "http://test.com/path");
    }

    #[test]
    fn set_query_data_rewrites_uri() {
        let mut req = request("http://test.com/path?k=v");
        let mut data = QueryData::new();
        data.insert("first".into(), vec!["value1.1".into(), "value1.2".into()]);
        req.set_query_data(&data);
        assert_eq!(
            req.uri().to_string(),
            "http://test.com/path?first=value1.1&first=value1.2"
        );
    }

    #[test]
    fn expect_continue_detection() {
        let mut req = request("/upload");
        assert!(!req.expects_continue());
        req.fields_mut().set(crate::fields::EXPECT, "100-Continue");
        assert!(req.expects_continue());
    }

    #[test]
    fn persistence_by_protocol() {
        let mut req = request("/");
        assert!(req.persistent_connection());
        req.fields_mut().set(crate::fields::CONNECTION, "close");
        assert!(!req.persistent_connection());

        let mut old = HttpRequest::new(Method::GET, "/".parse().unwrap(), Version::HTTP_10, false);
        assert!(!old.persistent_connection());
        old.fields_mut().set(crate::fields::CONNECTION, "keep-alive");
        assert!(old.persistent_connection());
    }
}
