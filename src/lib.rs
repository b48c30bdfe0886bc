#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Bidirectional audio relay between a telephony media stream and a realtime
//! speech model.
//!
//! One [`SessionRegistry`] owns every live call. Each call runs as a small
//! group of tasks: an actor holding the call phase, a reader per leg and a
//! writer feeding the caller. Audio is translated between 8 kHz mu-law and
//! 24 kHz PCM16 by [`codec`].

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use config::{RelayBuilder, RelayConfig, SessionConfig};
pub use error::{CodecError, Error, ParseError, Result};
pub use protocol::{ControlEvent, Encoding, Frame, Side};
pub use relay::{
    CloseReason, NoopObserver, Phase, SessionHandle, SessionObserver, SessionRegistry, SessionReport,
    StatsSnapshot,
};
pub use transport::{Connection, ModelConnector, TransportRx, TransportTx};
pub use transport::ws::WsModelConnector;

const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
