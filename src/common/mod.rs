#![forbid(unsafe_code)]
use std::{collections::HashMap, ffi::OsString};

pub use command::{Command, FromEnv};
pub use error::{Error, Stage};

pub mod bin_serde;
pub mod command;
pub mod error;

/// The variables handed to a launched program.
pub type Environment = HashMap<OsString, OsString>;
