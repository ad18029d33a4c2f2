use http::{Method, StatusCode, Version};

use crate::fields::FieldMap;
use crate::protocol::message::MessageHead;
use crate::protocol::request::HttpRequest;

/// What the response side needs to know about the request it answers:
/// a by-value summary standing in for a back-reference. The relation
/// carries no ownership; the request stays with whoever drives the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    method: Method,
    protocol: Version,
    persistent: bool,
    expects_continue: bool,
}

impl RequestInfo {
    pub fn of(request: &HttpRequest) -> Self {
        Self {
            method: request.method().clone(),
            protocol: request.protocol(),
            persistent: request.persistent_connection(),
            expects_continue: request.expects_continue(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn protocol(&self) -> Version {
        self.protocol
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn expects_continue(&self) -> bool {
        self.expects_continue
    }
}

/// An HTTP response header.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    reason: Option<String>,
    protocol: Version,
    fields: FieldMap,
    has_payload: bool,
    request: Option<RequestInfo>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, protocol: Version, has_payload: bool) -> Self {
        Self { status, reason: None, protocol, fields: FieldMap::new(), has_payload, request: None }
    }

    /// The preliminary response a request decoder attaches to a decoded
    /// request: status 501, protocol copied from the request, no payload.
    pub fn prepared_for(request: &HttpRequest) -> Self {
        let mut response = Self::new(StatusCode::NOT_IMPLEMENTED, request.protocol(), false);
        response.request = Some(RequestInfo::of(request));
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// The reason phrase: the explicitly set one, the status code's
    /// canonical phrase, or empty.
    pub fn reason_phrase(&self) -> &str {
        match &self.reason {
            Some(reason) => reason,
            None => self.status.canonical_reason().unwrap_or(""),
        }
    }

    pub fn set_reason_phrase(&mut self, reason: impl Into<String>) -> &mut Self {
        self.reason = Some(reason.into());
        self
    }

    /// The summary of the request this response answers, when known.
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    pub fn set_request(&mut self, request: RequestInfo) -> &mut Self {
        self.request = Some(request);
        self
    }

    /// Whether the status code permits a message body at all (1xx, 204
    /// and 304 do not).
    pub fn status_permits_payload(&self) -> bool {
        !(self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED)
    }
}

impl MessageHead for HttpResponse {
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
