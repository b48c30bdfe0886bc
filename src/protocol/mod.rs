//! Wire envelopes for both legs and the unified control vocabulary.

pub mod control;
pub mod frame;
pub mod realtime;
pub mod telephony;

pub use control::{ControlEvent, Side};
pub use frame::{Encoding, Frame, MODEL_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE};
pub use realtime::{ModelCommand, SessionUpdate, parse_model_event};
pub use telephony::{TelephonyCommand, parse_telephony_event};
