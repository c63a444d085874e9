//! UI-message streams: rendering-oriented chunks, the messages they build,
//! and the conversion back to model messages.

mod chunk;
mod convert;
mod message;
mod stream;

pub use chunk::{to_ui_chunks, UiChunk, UiMapOptions};
pub use convert::convert_to_model_messages;
pub use message::{
    UiApproval, UiMessage, UiMessageBuilder, UiPart, UiRole, UiTextState, UiToolPart,
};
pub use stream::{ui_message_stream, UiFinishEvent, UiFinishHook, UiStreamOptions};
