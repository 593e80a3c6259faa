//! Turning a `user[:group]` spec into the credentials a program will run with.

mod database;
mod resolve;
mod spec;

#[cfg(test)]
pub(crate) use database::fake;
pub use database::{CurrentProcess, IdentityDatabase};
pub use resolve::{resolve, ResolvedIdentity};
pub use spec::{ParsedSpec, Token, MAX_ID};
