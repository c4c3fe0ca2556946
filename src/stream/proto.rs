//! Text frames exchanged over the streaming socket.
//!
//! Outbound commands use the gateway's `<verb>+<id>+<json-args>` form, for
//! example `smd+265598+{"fields":["31","83"]}`. The keepalive frame is a bare
//! token. Inbound frames are passed through untouched; [`frame_topic`] is a
//! convenience for callers that want to route on the JSON `topic` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default keepalive frame.
pub const DEFAULT_HEARTBEAT_TOKEN: &str = "tic";

const VERB_SUBSCRIBE_MARKET_DATA: &str = "smd";
const VERB_UNSUBSCRIBE_MARKET_DATA: &str = "umd";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MarketDataArgs {
    pub fields: Vec<String>,
}

/// Command written to the socket by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `smd+<conid>+{"fields":[...]}`
    SubscribeMarketData { conid: u64, fields: Vec<String> },
    /// `umd+<conid>+{}`
    UnsubscribeMarketData { conid: u64 },
    /// Frame sent verbatim.
    Raw(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("command frame must be <verb>+<id>+<args>: {0:?}")]
    Malformed(String),

    #[error("command id is not numeric: {0:?}")]
    InvalidId(String),

    #[error("command args are not valid json: {0}")]
    InvalidArgs(String),
}

impl ClientCommand {
    pub fn subscribe_market_data<I, S>(conid: u64, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SubscribeMarketData {
            conid,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::SubscribeMarketData { conid, fields } => {
                let args = serde_json::to_string(&MarketDataArgs {
                    fields: fields.clone(),
                })?;
                Ok(format!("{VERB_SUBSCRIBE_MARKET_DATA}+{conid}+{args}"))
            }
            Self::UnsubscribeMarketData { conid } => {
                Ok(format!("{VERB_UNSUBSCRIBE_MARKET_DATA}+{conid}+{{}}"))
            }
            Self::Raw(text) => Ok(text.clone()),
        }
    }

    /// Parses a frame produced by [`to_text`](Self::to_text).
    ///
    /// Only the first two `+` separate fields; the JSON args may contain `+`.
    /// Frames with an unknown verb come back as [`ClientCommand::Raw`].
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let mut parts = text.splitn(3, '+');
        let (Some(verb), Some(id), Some(args)) = (parts.next(), parts.next(), parts.next()) else {
            return Ok(Self::Raw(text.to_string()));
        };

        match verb {
            VERB_SUBSCRIBE_MARKET_DATA => {
                let conid = parse_id(id)?;
                let args: MarketDataArgs = serde_json::from_str(args)
                    .map_err(|err| ProtocolError::InvalidArgs(err.to_string()))?;
                Ok(Self::SubscribeMarketData {
                    conid,
                    fields: args.fields,
                })
            }
            VERB_UNSUBSCRIBE_MARKET_DATA => {
                let conid = parse_id(id)?;
                serde_json::from_str::<Value>(args)
                    .map_err(|err| ProtocolError::InvalidArgs(err.to_string()))?;
                Ok(Self::UnsubscribeMarketData { conid })
            }
            "" => Err(ProtocolError::Malformed(text.to_string())),
            _ => Ok(Self::Raw(text.to_string())),
        }
    }
}

fn parse_id(id: &str) -> Result<u64, ProtocolError> {
    id.parse()
        .map_err(|_| ProtocolError::InvalidId(id.to_string()))
}

/// Returns the `topic` field of a JSON inbound frame, if any.
pub fn frame_topic(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("topic")?.as_str().map(str::to_string)
}
