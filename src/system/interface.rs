use std::{fmt::Display, io};

// transparent so a `&[GroupId]` can be handed to `setgroups` as is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct GroupId(libc::gid_t);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(libc::uid_t);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(libc::pid_t);

impl GroupId {
    pub const ROOT: Self = Self(0);

    pub const fn new(id: libc::gid_t) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> libc::gid_t {
        self.0
    }
}

impl UserId {
    pub const ROOT: Self = Self(0);

    pub const fn new(id: libc::uid_t) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> libc::uid_t {
        self.0
    }
}

impl ProcessId {
    pub const fn new(id: libc::pid_t) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> libc::pid_t {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three kernel credentials a privilege drop changes; see [`super::ProcessCredentials`].
pub trait Credentials {
    fn set_groups(&mut self, groups: &[GroupId]) -> io::Result<()>;
    fn set_gid(&mut self, gid: GroupId) -> io::Result<()>;
    fn set_uid(&mut self, uid: UserId) -> io::Result<()>;
}
