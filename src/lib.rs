//! Braid: a streaming core for LLM applications.
//!
//! A run drives a model through multiple steps, executes tool calls between
//! them, and publishes one ordered stream of parts. The same stream can be
//! read as text, as full parts, as UI chunks, or as an HTTP response, with
//! each view consuming independently.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use braid::prelude::*;
//!
//! # async fn example(provider: Arc<dyn ModelProvider>) -> Result<(), BraidError> {
//! let request = RunRequest::new(provider, vec![ModelMessage::user("Hello!")]);
//! let result = stream_text(request);
//! let mut text = result.text_stream();
//! while let Some(delta) = futures::StreamExt::next(&mut text).await {
//!     print!("{delta}");
//! }
//! let output = result.output().await?;
//! println!("\nsteps: {}", output.steps.len());
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod generation;
pub mod multiplex;
pub mod partial_json;
pub mod persistence;
pub mod prelude;
pub mod protocol;
pub mod provider;
pub mod response;
pub mod step_loop;
pub mod stop;
pub mod stream_transform;
pub mod tools;
pub mod types;
pub mod ui;
pub mod util;
