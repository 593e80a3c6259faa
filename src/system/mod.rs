use std::{
    ffi::{CStr, CString},
    io,
    mem::MaybeUninit,
    path::PathBuf,
};

use crate::{
    cutils::*,
    identity::IdentityDatabase,
};
use interface::{Credentials, GroupId, ProcessId, UserId};

// generalized traits for when we want to hide implementations
pub mod interface;

pub mod wait;

// glibc grows a user's group list on demand; past this many entries something is wrong with the
// database rather than with our buffer
const MAX_GROUPLIST_LEN: libc::c_int = 1 << 20;
const MAX_RECORD_BUFFER: usize = 1 << 24;

pub(crate) fn _exit(status: libc::c_int) -> ! {
    unsafe { libc::_exit(status) }
}

pub(crate) enum ForkResult {
    // Parent process branch with the child process' PID.
    Parent(ProcessId),
    // Child process branch.
    Child,
}

/// Create a new process.
///
/// # Safety
///
/// In a multithreaded program, only async-signal-safe functions are guaranteed to work in the
/// child process until a call to `execve` or a similar function is done.
pub(crate) unsafe fn fork() -> io::Result<ForkResult> {
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(ProcessId::new(pid)))
    }
}

/// Send a signal to a process with the specified ID.
#[cfg(test)]
pub(crate) fn kill(pid: ProcessId, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::kill(pid.get(), signal) }).map(|_| ())
}

pub(crate) fn chdir(path: &CStr) -> io::Result<()> {
    cerr(unsafe { libc::chdir(path.as_ptr()) }).map(|_| ())
}

/// A NULL-terminated `char *[]`, as taken by `execve`.
pub(crate) struct CStringArray {
    // owns the strings `pointers` points into
    _strings: Vec<CString>,
    pointers: Vec<*const libc::c_char>,
}

impl CStringArray {
    pub(crate) fn new(strings: Vec<CString>) -> CStringArray {
        let pointers = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        CStringArray {
            _strings: strings,
            pointers,
        }
    }

    fn as_ptr(&self) -> *const *const libc::c_char {
        self.pointers.as_ptr()
    }
}

/// Replace the process image. Only returns on failure, with the error `execve` reported.
///
/// Does not allocate.
pub(crate) fn execve(path: &CStr, argv: &CStringArray, envp: &CStringArray) -> io::Error {
    // SAFETY: `path` and both arrays are NUL-terminated and outlive the call
    unsafe { libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr()) };
    io::Error::last_os_error()
}

pub fn real_uid() -> UserId {
    UserId::new(unsafe { libc::getuid() })
}

pub fn real_gid() -> GroupId {
    GroupId::new(unsafe { libc::getgid() })
}

/// The supplementary groups of the current process, in the order the kernel reports them.
pub fn supplementary_groups() -> io::Result<Vec<GroupId>> {
    let count = cerr(unsafe { libc::getgroups(0, std::ptr::null_mut()) })?;
    let mut buffer: Vec<libc::gid_t> = vec![0; count as usize];
    let count = cerr(unsafe { libc::getgroups(count, buffer.as_mut_ptr()) })?;
    buffer.truncate(count as usize);

    Ok(buffer.into_iter().map(GroupId::new).collect())
}

/// The maximum number of supplementary groups the kernel accepts in `setgroups`.
pub fn ngroups_max() -> Option<usize> {
    sysconf(libc::_SC_NGROUPS_MAX).map(|max| max as usize)
}

/// The credentials of the running process, changed with `setgroups`, `setgid` and `setuid`.
///
/// None of the calls allocate, so they can be made between `fork` and `exec`.
pub struct ProcessCredentials;

impl Credentials for ProcessCredentials {
    fn set_groups(&mut self, groups: &[GroupId]) -> io::Result<()> {
        // SAFETY: `GroupId` is `repr(transparent)` over `gid_t`
        cerr(unsafe { libc::setgroups(groups.len() as _, groups.as_ptr().cast::<libc::gid_t>()) })
            .map(|_| ())
    }

    fn set_gid(&mut self, gid: GroupId) -> io::Result<()> {
        cerr(unsafe { libc::setgid(gid.get()) }).map(|_| ())
    }

    fn set_uid(&mut self, uid: UserId) -> io::Result<()> {
        cerr(unsafe { libc::setuid(uid.get()) }).map(|_| ())
    }
}

/// Call one of the reentrant `getpw*_r`/`getgr*_r` functions, growing the string buffer while
/// the C library reports `ERANGE`. `convert` runs while the buffer is still alive.
fn get_entry<T, R>(
    size_hint: libc::c_int,
    mut call: impl FnMut(*mut T, *mut libc::c_char, libc::size_t, *mut *mut T) -> libc::c_int,
    convert: impl FnOnce(&T) -> io::Result<R>,
) -> io::Result<Option<R>> {
    let mut buf_len = sysconf(size_hint).unwrap_or(16_384) as usize;

    loop {
        let mut buf: Vec<libc::c_char> = vec![0; buf_len];
        let mut entry = MaybeUninit::<T>::uninit();
        let mut entry_ptr = std::ptr::null_mut();

        match call(entry.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut entry_ptr) {
            0 if entry_ptr.is_null() => return Ok(None),
            // SAFETY: a zero return with a non-null result pointer means `entry` was filled in
            0 => return convert(unsafe { entry.assume_init_ref() }).map(Some),
            libc::ERANGE if buf_len < MAX_RECORD_BUFFER => buf_len *= 2,
            // see the NOTES section of getpwnam(3): these all mean "no such entry"
            libc::ENOENT | libc::ESRCH | libc::EBADF => return Ok(None),
            errno => return Err(io::Error::from_raw_os_error(errno)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: UserId,
    pub gid: GroupId,
    pub name: String,
    pub home: PathBuf,
    /// Every group the user is a member of, as enumerated by `getgrouplist`; includes `gid`.
    pub groups: Vec<GroupId>,
}

impl User {
    /// # Safety
    /// This function expects `pwd` to be a result from a succesful call to `getpwXXX_r`.
    /// (It can cause UB if any of `pwd`'s pointed-to strings does not have a null-terminator.)
    unsafe fn from_libc(pwd: &libc::passwd) -> io::Result<User> {
        let mut buf_len: libc::c_int = 32;
        let mut groups_buffer: Vec<libc::gid_t>;

        loop {
            groups_buffer = vec![0; buf_len as usize];
            let mut found = buf_len;
            let result = unsafe {
                libc::getgrouplist(
                    pwd.pw_name,
                    pwd.pw_gid as _,
                    groups_buffer.as_mut_ptr() as *mut _,
                    &mut found,
                )
            };

            if result != -1 {
                groups_buffer.truncate(found as usize);
                break;
            }

            // glibc reports the required size, other implementations leave it untouched
            buf_len = if found > buf_len { found } else { buf_len * 2 };
            if buf_len > MAX_GROUPLIST_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "user is a member of an unreasonable number of groups",
                ));
            }
        }

        Ok(User {
            uid: UserId::new(pwd.pw_uid),
            gid: GroupId::new(pwd.pw_gid),
            name: string_from_ptr(pwd.pw_name),
            home: os_string_from_ptr(pwd.pw_dir).into(),
            groups: groups_buffer.into_iter().map(GroupId::new).collect(),
        })
    }

    pub fn from_uid(uid: UserId) -> io::Result<Option<User>> {
        get_entry(
            libc::_SC_GETPW_R_SIZE_MAX,
            |pwd, buf, len, result| unsafe { libc::getpwuid_r(uid.get(), pwd, buf, len, result) },
            |pwd| unsafe { Self::from_libc(pwd) },
        )
    }

    pub fn from_name(name_c: &CStr) -> io::Result<Option<User>> {
        get_entry(
            libc::_SC_GETPW_R_SIZE_MAX,
            |pwd, buf, len, result| unsafe {
                libc::getpwnam_r(name_c.as_ptr(), pwd, buf, len, result)
            },
            |pwd| unsafe { Self::from_libc(pwd) },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub gid: GroupId,
    pub name: String,
}

impl Group {
    /// # Safety
    /// This function expects `grp` to be a result from a succesful call to `getgrXXX_r`.
    unsafe fn from_libc(grp: &libc::group) -> Group {
        Group {
            gid: GroupId::new(grp.gr_gid),
            name: string_from_ptr(grp.gr_name),
        }
    }

    pub fn from_name(name_c: &CStr) -> io::Result<Option<Group>> {
        get_entry(
            libc::_SC_GETGR_R_SIZE_MAX,
            |grp, buf, len, result| unsafe {
                libc::getgrnam_r(name_c.as_ptr(), grp, buf, len, result)
            },
            |grp| Ok(unsafe { Group::from_libc(grp) }),
        )
    }
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "names in the user database cannot contain NUL bytes",
        )
    })
}

/// The system `passwd` and `group` databases, through the C library (and so through NSS).
///
/// Every call queries the database afresh.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDatabase;

impl IdentityDatabase for SystemDatabase {
    fn user_by_name(&self, name: &str) -> io::Result<Option<User>> {
        User::from_name(&c_name(name)?)
    }

    fn user_by_uid(&self, uid: UserId) -> io::Result<Option<User>> {
        User::from_uid(uid)
    }

    fn group_by_name(&self, name: &str) -> io::Result<Option<Group>> {
        Group::from_name(&c_name(name)?)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::{
        interface::{Credentials, GroupId, UserId},
        Group, ProcessCredentials, SystemDatabase, User,
    };
    use crate::identity::IdentityDatabase;

    #[test]
    fn test_get_user_by_id_and_group_by_name() {
        let fixed_users = &[(0, "root"), (1, "daemon")];
        for &(id, name) in fixed_users {
            let user = User::from_uid(UserId::new(id)).unwrap().unwrap();
            assert_eq!(user.uid, UserId::new(id));
            assert_eq!(user.name, name);
        }
        for &(id, name) in fixed_users {
            let group = Group::from_name(&CString::new(name).unwrap())
                .unwrap()
                .unwrap();
            assert_eq!(group.gid, GroupId::new(id));
            assert_eq!(group.name, name);
        }
    }

    #[test]
    fn root_has_a_home_and_its_primary_group() {
        let root = User::from_name(&CString::new("root").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(root.home, std::path::Path::new("/root"));
        assert!(root.groups.contains(&GroupId::ROOT));
    }

    #[test]
    fn missing_entries_are_not_errors() {
        let db = SystemDatabase;
        assert_eq!(db.user_by_name("pysu_no_such_user").unwrap(), None);
        assert_eq!(db.group_by_name("pysu_no_such_group").unwrap(), None);
        assert!(db.user_by_name("nul\0byte").is_err());
    }

    #[test]
    fn miri_test_group_impl() {
        fn test(name: &str, passwd: &str, gid: libc::gid_t) {
            let c_name = CString::new(name).unwrap();
            let c_passwd = CString::new(passwd).unwrap();
            let mut members: Vec<*mut libc::c_char> = vec![std::ptr::null_mut()];
            let group = unsafe {
                Group::from_libc(&libc::group {
                    gr_name: c_name.as_ptr() as *mut _,
                    gr_passwd: c_passwd.as_ptr() as *mut _,
                    gr_gid: gid,
                    gr_mem: members.as_mut_ptr(),
                })
            };
            assert_eq!(
                group,
                Group {
                    name: name.to_string(),
                    gid: GroupId::new(gid),
                }
            );
        }

        test("games", "x", 60);
        test("daemon", "", 1);
    }

    #[test]
    fn unprivileged_processes_cannot_change_uid() {
        if super::real_uid() == UserId::ROOT {
            return;
        }

        let target = UserId::new(super::real_uid().get().wrapping_add(1));
        let err = ProcessCredentials.set_uid(target).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
    }

    #[test]
    fn c_string_array_is_null_terminated() {
        let array = super::CStringArray::new(vec![
            CString::new("sh").unwrap(),
            CString::new("-c").unwrap(),
        ]);
        assert_eq!(array.pointers.len(), 3);
        assert!(array.pointers[2].is_null());
        let first = unsafe { std::ffi::CStr::from_ptr(array.pointers[0]) };
        assert_eq!(first.to_str().unwrap(), "sh");
    }

    #[test]
    fn chdir_reports_missing_directories() {
        let err = super::chdir(&CString::new("/pysu/no/such/dir").unwrap()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn groups_limit_is_reported() {
        assert!(super::ngroups_max().unwrap() >= 1);
        assert!(super::supplementary_groups().is_ok());
    }
}
