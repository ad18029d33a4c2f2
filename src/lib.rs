//! A non-blocking, incremental HTTP/1.x codec.
//!
//! The crate translates between byte streams and structured message
//! representations without performing any I/O of its own. Decoders and
//! encoders are pull/push driven state machines: every call consumes and
//! produces as much as the supplied buffers allow, reports `underflow`
//! or `overflow` when a buffer runs out, and resumes exactly where it
//! left off on the next call.
//!
//! - [`codec`] holds the decoder and encoder state machines, plus
//!   `tokio-util` adapters in [`codec::framed`].
//! - [`protocol`] holds the message model: [`protocol::HttpRequest`],
//!   [`protocol::HttpResponse`] and the query/form helpers.
//! - [`fields`] holds typed header field values and their bidirectional
//!   wire-format converters.
//! - [`engine`] pairs a decoder and an encoder on one connection and
//!   installs new codecs when an in-stream protocol upgrade completes;
//!   [`upgrade`] is the extension point those new codecs come from.
//!
//! ```
//! use bytes::BytesMut;
//! use httpcodec::codec::{HttpRequestDecoder, HttpResponseEncoder};
//! use httpcodec::engine::ServerEngine;
//!
//! let mut engine = ServerEngine::new(HttpRequestDecoder::new(), HttpResponseEncoder::new());
//! let mut inbound = BytesMut::from(&b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n"[..]);
//! let result = engine.decode(&mut inbound, &mut [], false)?;
//! assert!(result.message_completed());
//!
//! // the decoder prepared a 501 response; adjust and send it back
//! let mut request = engine.take_request().unwrap();
//! let mut response = request.take_response().unwrap();
//! response.set_status(http::StatusCode::OK);
//!
//! engine.encode_header(response)?;
//! let mut outbound = [0u8; 512];
//! let result = engine.encode(&mut BytesMut::new(), &mut outbound, true)?;
//! assert!(result.message_completed());
//! # Ok::<(), httpcodec::protocol::HttpError>(())
//! ```

pub mod codec;
pub mod engine;
pub mod fields;
pub mod protocol;
pub mod scan;
pub mod upgrade;

pub use protocol::HttpError;
