//! Tool server plumbing: scoped connections, the manifest cache, and the
//! streamable HTTP transport.

mod connection;
mod http;
mod manifest;

pub use connection::{ConnectionLease, Connector, LeasePurpose, ScopedConnection, ToolChannel};
pub use http::McpHttpConnector;
pub use manifest::{ToolDescriptor, ToolManifest, ToolManifestCache};
