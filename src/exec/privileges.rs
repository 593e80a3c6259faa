use std::io;

use crate::{
    common::{Error, Stage},
    identity::ResolvedIdentity,
    system::{interface::Credentials, ngroups_max},
};

/// The credential call that failed, with the error it returned.
#[derive(Debug)]
pub(super) struct CredentialFailure {
    pub(super) stage: Stage,
    pub(super) source: io::Error,
}

/// Switch `creds` to `identity`: supplementary groups, then the gid, then the uid.
///
/// The first failing call ends the sequence; nothing that already changed is restored. Neither
/// this function nor [`ProcessCredentials`](crate::system::ProcessCredentials) allocates or logs,
/// so it can run in a freshly forked child.
pub(super) fn drop_privileges(
    creds: &mut impl Credentials,
    identity: &ResolvedIdentity,
) -> Result<(), CredentialFailure> {
    let fail = |stage| move |source| CredentialFailure { stage, source };

    creds
        .set_groups(&identity.groups)
        .map_err(fail(Stage::DropGroups))?;
    creds.set_gid(identity.gid).map_err(fail(Stage::DropGid))?;
    creds.set_uid(identity.uid).map_err(fail(Stage::DropUid))?;

    Ok(())
}

/// Classify the failure of one credential call.
///
/// `setgroups` answers EINVAL for a list longer than `NGROUPS_MAX`.
pub(super) fn credential_error(failure: CredentialFailure, group_count: usize) -> Error {
    let CredentialFailure { stage, source } = failure;
    if stage == Stage::DropGroups && source.raw_os_error() == Some(libc::EINVAL) {
        Error::TooManyGroups {
            stage,
            count: group_count,
            limit: ngroups_max(),
        }
    } else {
        Error::PermissionDenied { stage, source }
    }
}
