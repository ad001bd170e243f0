//! Request router: parses the proxy URL surface, applies the Codex
//! web-token auth rewrite, picks a scheme, and classifies which paths
//! are conversations worth logging.

pub mod classifier;
pub mod path;

pub use classifier::is_conversation_path;
pub use path::{apply_auth_rewrite, parse, scheme_for, ParsedRoute, RouteError};
