use std::{ffi::OsString, fmt, io, path::PathBuf};

/// The step of an invocation at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    ResolveUser,
    ResolveGroup,
    DropGroups,
    DropGid,
    DropUid,
    Launch,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::ResolveUser => "resolve-user",
            Stage::ResolveGroup => "resolve-group",
            Stage::DropGroups => "drop-groups",
            Stage::DropGid => "drop-gid",
            Stage::DropUid => "drop-uid",
            Stage::Launch => "launch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum Error {
    InvalidSpec {
        spec: String,
        reason: String,
    },
    UnknownUser(String),
    UnknownGroup(String),
    TooManyGroups {
        stage: Stage,
        count: usize,
        limit: Option<usize>,
    },
    PermissionDenied {
        stage: Stage,
        source: io::Error,
    },
    LaunchFailed {
        program: PathBuf,
        source: io::Error,
    },
    MissingEnvironment {
        variable: OsString,
        purpose: String,
        program: PathBuf,
    },
    Io(Stage, io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSpec { spec, reason } => {
                write!(f, "invalid user spec string \"{spec}\": {reason}")
            }
            Error::UnknownUser(u) => write!(f, "user '{u}' not found"),
            Error::UnknownGroup(g) => write!(f, "group '{g}' not found"),
            Error::TooManyGroups { count, limit, .. } => match limit {
                Some(limit) => write!(
                    f,
                    "too many supplementary groups: {count} (this system allows {limit})"
                ),
                None => write!(f, "too many supplementary groups: {count}"),
            },
            Error::PermissionDenied { stage, source } => {
                let call = match stage {
                    Stage::DropGroups => "setgroups",
                    Stage::DropGid => "setgid",
                    _ => "setuid",
                };
                write!(f, "{stage}: {call} failed: {source}")
            }
            Error::LaunchFailed { program, source } => {
                if source.kind() == io::ErrorKind::NotFound {
                    write!(f, "'{}': command not found", program.display())
                } else {
                    write!(f, "cannot execute '{}': {source}", program.display())
                }
            }
            Error::MissingEnvironment {
                variable,
                purpose,
                program,
            } => write!(
                f,
                "environment variable \"{}\" is required to determine {purpose} for program \"{}\"",
                variable.to_string_lossy(),
                program.display()
            ),
            Error::Io(stage, e) => write!(f, "{stage}: IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PermissionDenied { source, .. }
            | Error::LaunchFailed { source, .. }
            | Error::Io(_, source) => Some(source),
            _ => None,
        }
    }
}

impl Error {
    pub(crate) fn invalid_spec(spec: &str, reason: impl Into<String>) -> Self {
        Error::InvalidSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    /// The step of the invocation that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Error::InvalidSpec { .. } => Stage::Parse,
            Error::UnknownUser(_) => Stage::ResolveUser,
            Error::UnknownGroup(_) => Stage::ResolveGroup,
            Error::TooManyGroups { stage, .. } | Error::PermissionDenied { stage, .. } => *stage,
            Error::LaunchFailed { .. } | Error::MissingEnvironment { .. } => Stage::Launch,
            Error::Io(stage, _) => *stage,
        }
    }

    /// Exit status used by the `pysu` binary for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidSpec { .. } => 2,
            Error::UnknownUser(_) => 3,
            Error::UnknownGroup(_) => 4,
            Error::TooManyGroups { .. } => 5,
            Error::PermissionDenied { .. } => 6,
            Error::MissingEnvironment { .. } => 7,
            Error::LaunchFailed { source, .. } if source.kind() == io::ErrorKind::NotFound => 127,
            Error::LaunchFailed { .. } => 126,
            Error::Io(..) => 1,
        }
    }
}
