//! # Agent Relay
//!
//! Streams answers from a remote tool-using agent while shielding the caller
//! from a flaky network.
//!
//! A session looks up the tool manifest (cached, single-flight), takes a
//! fresh lease on the MCP tool server, and invokes the remote agent. The
//! response is decoded frame by frame into text segments and tool-status
//! notifications. Transient failures are retried with exponential backoff
//! under a per-attempt timeout and an overall session deadline; when retries
//! run out, whatever the final attempt produced is still shown.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agent_relay::{agent::Agent, config::Config};
//! use futures::StreamExt;
//!
//! let config = Config::from_env()?;
//! let agent = Agent::from_config(&config)?;
//! let mut session = agent.run("What is the weather in Lisbon?");
//! while let Some(event) = session.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod mcp;
pub mod observer;
pub mod stream;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::InvokeError;
