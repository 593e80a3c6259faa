use std::{ffi::OsString, path::Path};

use crate::common::Environment;

/// Point `HOME` at the home directory of the identity the program will run as.
///
/// Only `HOME` changes; `USER`, `LOGNAME` and the rest of the environment are passed on as given.
pub(crate) fn set_home(env: &mut Environment, home: &Path) {
    env.insert(OsString::from("HOME"), home.as_os_str().to_owned());
}
