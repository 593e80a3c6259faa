use std::{ffi::OsString, path::Path};

use crate::identity::ResolvedIdentity;

/// Everything the executor needs to start a program, borrowed from the caller.
pub struct RunOptions<'a> {
    /// As given by the caller; becomes `argv[0]`.
    pub program: &'a Path,
    pub arguments: &'a [OsString],
    pub chdir: Option<&'a Path>,
    /// `None` runs the program with the credentials of this process.
    pub identity: Option<&'a ResolvedIdentity>,
}
