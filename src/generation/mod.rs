//! Text, streaming, and structured output generation.

pub mod object;
pub mod stream;
pub mod text;

pub use object::{
    generate_object, stream_array, stream_object, GenerateObjectResult, ObjectOutput,
    StreamObjectResult,
};
pub use stream::{stream_text, StreamTextResult};
pub use text::{generate_text, GenerateTextResult};
