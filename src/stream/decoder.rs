use super::policy::ConnectionAttempt;
use crate::protocol::{PARSE_FAILED, StreamFrame, WireFrame};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Frames to hand to the caller for one raw payload, in delivery order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub fragment: Option<StreamFrame>,
    pub terminal: Option<StreamFrame>,
}

/// Decode one `data:` payload against the current attempt.
///
/// A payload that is not a JSON frame is fatal and never retried.
pub fn decode(payload: &str, attempt: &mut ConnectionAttempt, now: Instant) -> Decoded {
    let wire: WireFrame = match serde_json::from_str(payload) {
        Ok(wire) => wire,
        Err(err) => {
            warn!(error = %err, "failed to parse stream frame");
            return Decoded {
                fragment: None,
                terminal: Some(StreamFrame::failed(PARSE_FAILED)),
            };
        }
    };

    attempt.record_frame(now);

    if let Some(error) = wire.error.filter(|error| !error.is_empty()) {
        debug!(%error, "server reported an error frame");
        return Decoded {
            fragment: None,
            terminal: Some(StreamFrame::failed(error)),
        };
    }

    let mut decoded = Decoded::default();
    if let Some(text) = wire.text.filter(|text| !text.is_empty()) {
        attempt.push_text(&text);
        decoded.fragment = Some(StreamFrame::fragment(text));
    }
    if wire.done {
        decoded.terminal = Some(StreamFrame::finished(wire.chat_session));
    }
    decoded
}
