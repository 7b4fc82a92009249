//! Caller authentication
//!
//! Turns an opaque MCP session id into a ready-to-use upstream credential:
//! - Session store (in-memory, concurrent)
//! - Short-lived token exchange against the internal auth service
//! - Context builder composing the two

mod context;
mod exchange;
mod session;

pub use context::{AuthContext, ContextBuilder, looks_like_cookie};
pub use exchange::{ShortLivedToken, TokenExchange, TokenExchangeClient};
pub use session::{Session, SessionStore, UNKNOWN_SESSION};

#[cfg(test)]
pub(crate) use context::tests::FixedExchange;
#[cfg(test)]
pub(crate) use session::tests::session as test_session;
