//! Role types of a Keel node.
//!
//! Currently there is a single role, `validator`: a node that holds a signing
//! key of a committee member, proposes blocks and votes on them. Everything a
//! validator signs, sends or logs to its WAL is defined here, together with
//! the canonical chain-scoped encoding its signatures are computed over.

mod serde_fmt;
pub mod validator;
