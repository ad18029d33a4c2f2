mod message;
mod request;
mod response;

use snafu::Snafu;

use crate::codec::{DecodeError, EncodeError};

pub use message::{Message, MessageHead, PayloadItem};
pub use request::{
    replace_query, simple_www_form_urlencode, www_form_urlencode, HttpRequest, QueryData,
};
pub use response::{HttpResponse, RequestInfo};

/// Umbrella error for callers driving both directions of a connection.
#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("decode error: {source}"), context(false))]
    Decode { source: DecodeError },

    #[snafu(display("encode error: {source}"), context(false))]
    Encode { source: EncodeError },
}
