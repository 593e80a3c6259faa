#[macro_use]
mod macros;
pub(crate) mod common;
pub(crate) mod cutils;
pub(crate) mod exec;
pub(crate) mod identity;
pub(crate) mod log;
pub(crate) mod system;

mod pysu;

pub use common::{Command, Environment, Error, FromEnv, Stage};
pub use exec::ExitReason;
pub use identity::{
    resolve, CurrentProcess, IdentityDatabase, ParsedSpec, ResolvedIdentity, Token, MAX_ID,
};
pub use pysu::main as pysu_main;
pub use system::{
    interface::{GroupId, UserId},
    Group, SystemDatabase, User,
};
