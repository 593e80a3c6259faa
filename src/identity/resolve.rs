use std::{fmt, path::PathBuf};

use crate::{
    common::{Error, Stage},
    log::dev_debug,
    system::{
        interface::{GroupId, UserId},
        User,
    },
};

use super::{CurrentProcess, IdentityDatabase, ParsedSpec, Token};

/// Home directory for identities that have no database record.
const NO_HOME: &str = "/";

/// The credentials and home directory a spec resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: UserId,
    pub gid: GroupId,
    /// Deduplicated, never empty, `groups[0] == gid`.
    pub groups: Vec<GroupId>,
    pub home: PathBuf,
}

/// Formatted like `echo "$(id -u):$(id -g):$(id -G)"`.
impl fmt::Display for ResolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.uid, self.gid)?;
        for (i, gid) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{gid}")?;
        }
        Ok(())
    }
}

/// What the user side of a spec resolved to.
enum UserRow {
    /// Empty user token: the calling process, unchanged. The record (if any) only supplies `home`.
    Current { record: Option<User> },
    /// Numeric user token. The uid is used whether or not the database knows it.
    Uid { uid: UserId, record: Option<User> },
    /// Named user token; a miss has already failed with `UnknownUser`.
    Named(User),
}

/// What the group side of a spec resolved to.
enum GroupColumn {
    /// No group token, or an empty one after a trailing ':'.
    Default,
    Gid(GroupId),
    Named(GroupId),
}

impl UserRow {
    fn uid(&self, current: &CurrentProcess) -> UserId {
        match self {
            UserRow::Current { .. } => current.uid,
            UserRow::Uid { uid, .. } => *uid,
            UserRow::Named(user) => user.uid,
        }
    }

    fn record(&self) -> Option<&User> {
        match self {
            UserRow::Current { record } | UserRow::Uid { record, .. } => record.as_ref(),
            UserRow::Named(user) => Some(user),
        }
    }
}

fn resolve_user(
    token: &Token,
    db: &impl IdentityDatabase,
    current: &CurrentProcess,
) -> Result<UserRow, Error> {
    let lookup_failed = |err| Error::Io(Stage::ResolveUser, err);

    let row = match token {
        Token::Empty => UserRow::Current {
            record: db.user_by_uid(current.uid).map_err(lookup_failed)?,
        },
        Token::Id(id) => {
            let uid = UserId::new(*id);
            UserRow::Uid {
                uid,
                record: db.user_by_uid(uid).map_err(lookup_failed)?,
            }
        }
        Token::Name(name) => UserRow::Named(
            db.user_by_name(name)
                .map_err(lookup_failed)?
                .ok_or_else(|| Error::UnknownUser(name.clone()))?,
        ),
    };

    // every system has a root entry; one without it is not something to paper over
    let uid = row.uid(current);
    if uid == UserId::ROOT && row.record().is_none() {
        return Err(Error::UnknownUser(uid.to_string()));
    }

    Ok(row)
}

fn resolve_group(token: Option<&Token>, db: &impl IdentityDatabase) -> Result<GroupColumn, Error> {
    match token {
        None | Some(Token::Empty) => Ok(GroupColumn::Default),
        Some(Token::Id(id)) => Ok(GroupColumn::Gid(GroupId::new(*id))),
        Some(Token::Name(name)) => db
            .group_by_name(name)
            .map_err(|err| Error::Io(Stage::ResolveGroup, err))?
            .map(|group| GroupColumn::Named(group.gid))
            .ok_or_else(|| Error::UnknownGroup(name.clone())),
    }
}

/// `primary` followed by the members of `rest` that are not already in the list.
fn primary_first(primary: GroupId, rest: &[GroupId]) -> Vec<GroupId> {
    let mut groups = vec![primary];
    for gid in rest {
        if !groups.contains(gid) {
            groups.push(*gid);
        }
    }
    groups
}

/// Resolve a parsed spec against a database and the identity of the calling process.
///
/// The database is only read; the same inputs always produce the same result.
pub fn resolve(
    spec: &ParsedSpec,
    db: &impl IdentityDatabase,
    current: &CurrentProcess,
) -> Result<ResolvedIdentity, Error> {
    let user = resolve_user(&spec.user, db, current)?;
    let group = resolve_group(spec.group.as_ref(), db)?;

    let groups = match (&user, &group) {
        // the caller keeps its own primary and supplementary groups
        (UserRow::Current { .. }, GroupColumn::Default) => {
            primary_first(current.gid, &current.groups)
        }
        // a known user brings its full membership
        (UserRow::Uid { record: Some(record), .. }, GroupColumn::Default)
        | (UserRow::Named(record), GroupColumn::Default) => {
            primary_first(record.gid, &record.groups)
        }
        // an unknown uid has no membership to bring
        (UserRow::Uid { record: None, .. }, GroupColumn::Default) => vec![current.gid],
        // an explicit group replaces everything, whatever the user side was
        (_, GroupColumn::Gid(gid)) | (_, GroupColumn::Named(gid)) => vec![*gid],
    };

    if let Some(limit) = current.max_groups {
        if groups.len() > limit {
            return Err(Error::TooManyGroups {
                stage: Stage::ResolveGroup,
                count: groups.len(),
                limit: Some(limit),
            });
        }
    }

    let home = user
        .record()
        .map(|record| record.home.clone())
        .unwrap_or_else(|| PathBuf::from(NO_HOME));

    let identity = ResolvedIdentity {
        uid: user.uid(current),
        gid: groups[0],
        groups,
        home,
    };

    dev_debug!("spec \"{spec}\" resolved to {identity}");

    Ok(identity)
}
