//! Core types for braid.

pub mod generation;
pub mod message;
pub mod run;
pub mod step;
pub mod stream;
pub mod usage;

pub use generation::*;
pub use message::*;
pub use run::*;
pub use step::*;
pub use stream::*;
pub use usage::*;
