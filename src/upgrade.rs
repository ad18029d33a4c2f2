//! Extension point for in-stream protocol switches.
//!
//! When a `101 Switching Protocols` exchange completes, the HTTP codecs
//! hand the connection over to a new codec pair obtained from a
//! registered [`UpgradeProvider`]. The engine installs the pair; the
//! bytes that follow belong entirely to the new protocol.

use std::fmt;

use bytes::BytesMut;

use crate::codec::{DecodeError, EncodeError, RecvResult, SendResult};

/// Byte-level decoder for a post-upgrade protocol. Message semantics are
/// the new protocol's business; the engine only moves bytes.
pub trait ProtocolDecoder {
    fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<RecvResult, DecodeError>;
}

/// Byte-level encoder for a post-upgrade protocol.
pub trait ProtocolEncoder {
    fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<SendResult, EncodeError>;
}

/// The outcome of a completed upgrade: the protocol's name as it appeared
/// in the `Upgrade` field and the codec pair to install.
pub struct ProtocolSwitch {
    protocol: String,
    decoder: Box<dyn ProtocolDecoder + Send>,
    encoder: Box<dyn ProtocolEncoder + Send>,
}

impl ProtocolSwitch {
    pub fn new(
        protocol: impl Into<String>,
        decoder: Box<dyn ProtocolDecoder + Send>,
        encoder: Box<dyn ProtocolEncoder + Send>,
    ) -> Self {
        Self { protocol: protocol.into(), decoder, encoder }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn into_parts(
        self,
    ) -> (String, Box<dyn ProtocolDecoder + Send>, Box<dyn ProtocolEncoder + Send>) {
        (self.protocol, self.decoder, self.encoder)
    }
}

impl fmt::Debug for ProtocolSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSwitch").field("protocol", &self.protocol).finish_non_exhaustive()
    }
}

/// Builds codec pairs for one upgradable protocol.
pub trait UpgradeProvider {
    /// The protocol token this provider answers to, compared
    /// case-insensitively against `Upgrade` field values.
    fn protocol(&self) -> &str;

    /// Creates the codec pair driving the connection after the switch.
    fn create(&self) -> ProtocolSwitch;
}

pub(crate) fn find_provider<'a>(
    providers: &'a [Box<dyn UpgradeProvider + Send>],
    token: &str,
) -> Option<&'a (dyn UpgradeProvider + Send)> {
    providers
        .iter()
        .find(|provider| provider.protocol().eq_ignore_ascii_case(token))
        .map(|provider| &**provider)
}
