use std::io;

use crate::system::{
    self,
    interface::{GroupId, UserId},
    Group, User,
};

/// Read-only lookups in the user and group databases.
///
/// `Ok(None)` is a miss; `Err` means the database itself could not be consulted.
pub trait IdentityDatabase {
    fn user_by_name(&self, name: &str) -> io::Result<Option<User>>;
    fn user_by_uid(&self, uid: UserId) -> io::Result<Option<User>>;
    fn group_by_name(&self, name: &str) -> io::Result<Option<Group>>;
}

/// The identity the caller is running under, taken once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentProcess {
    pub uid: UserId,
    pub gid: GroupId,
    pub groups: Vec<GroupId>,
    /// `NGROUPS_MAX` for this system, if it reports one.
    pub max_groups: Option<usize>,
}

impl CurrentProcess {
    /// Snapshot the real uid, real gid and supplementary groups of this process.
    pub fn snapshot() -> io::Result<CurrentProcess> {
        Ok(CurrentProcess {
            uid: system::real_uid(),
            gid: system::real_gid(),
            groups: system::supplementary_groups()?,
            max_groups: system::ngroups_max(),
        })
    }
}
