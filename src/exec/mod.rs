#![deny(unsafe_code)]

mod environment;
mod interface;
mod privileges;

use std::{
    ffi::{CString, OsStr},
    io,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use crate::{
    common::{
        bin_serde::{BinPipe, DeSerialize},
        Environment, Error, Stage,
    },
    identity::ResolvedIdentity,
    log::{dev_info, dev_warn},
    system::{
        _exit, chdir, execve, fork, interface::ProcessId, wait::Wait, CStringArray, ForkResult,
        ProcessCredentials,
    },
};

pub use interface::RunOptions;

use self::{
    environment::set_home,
    privileges::{credential_error, drop_privileges, CredentialFailure},
};

/// Exit reason for the program run by pysu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    Signal(i32),
}

impl ExitReason {
    /// The status a shell would report: the exit code, or `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Code(code) => *code,
            ExitReason::Signal(signal) => 128 + signal,
        }
    }
}

/// Replace the current process with the program, running as `options.identity`.
///
/// Only returns on failure. A failure after the drop leaves this process with the new
/// credentials.
pub fn exec_command(options: &RunOptions, mut env: Environment) -> Error {
    if let Some(identity) = options.identity {
        set_home(&mut env, &identity.home);
    }

    let prepared = match PreparedExec::new(options, &env) {
        Ok(prepared) => prepared,
        Err(err) => return err,
    };

    dev_info!(
        "executing {} ({} candidate paths)",
        options.program.display(),
        prepared.candidates.len()
    );
    prepared.exec().into_error(options)
}

/// Run the program in a child process and wait for it.
///
/// A child that could not start the program reports why over a pipe, and that failure is returned
/// here. Once the program runs, its exit reason is returned whatever it is.
pub fn run_command(options: &RunOptions, mut env: Environment) -> Result<ExitReason, Error> {
    if let Some(identity) = options.identity {
        set_home(&mut env, &identity.home);
    }

    // the child must not allocate, so everything it needs is built here
    let prepared = PreparedExec::new(options, &env)?;

    let launch_io = |err| Error::Io(Stage::Launch, err);

    // Use a pipe to get the error if dropping privileges or `exec` fails.
    let (mut errpipe_tx, mut errpipe_rx) = BinPipe::<ChildFailure>::pair().map_err(launch_io)?;

    // SAFETY: the child only makes the credential calls, `chdir` and `execve`, or writes why it
    // could not to the pipe and exits. None of these allocate or take locks.
    #[allow(unsafe_code)]
    let fork_result = unsafe { fork() };

    let ForkResult::Parent(command_pid) = fork_result.map_err(|err| {
        dev_warn!("unable to fork command process: {err}");
        launch_io(err)
    })?
    else {
        drop(errpipe_rx);

        let failure = prepared.exec();
        errpipe_tx.write(&failure).ok();

        _exit(failure.exit_code());
    };

    dev_info!("started {} with pid {command_pid}", options.program.display());
    drop(errpipe_tx);

    // both ends are close-on-exec: end-of-file means the program is running
    let failure = errpipe_rx.read();
    let status = command_pid.wait().map_err(launch_io)?;

    if let Some(failure) = failure.map_err(launch_io)? {
        dev_warn!("{command_pid} could not start the program: {failure:?}");
        return Err(failure.into_error(options));
    }

    exit_reason(command_pid, status.exit_status(), status.term_signal())
}

fn exit_reason(
    pid: ProcessId,
    code: Option<i32>,
    signal: Option<i32>,
) -> Result<ExitReason, Error> {
    match (code, signal) {
        (Some(code), _) => {
            dev_info!("{pid} exited with status code {code}");
            Ok(ExitReason::Code(code))
        }
        (None, Some(signal)) => {
            dev_info!("{pid} was terminated by signal {signal}");
            Ok(ExitReason::Signal(signal))
        }
        (None, None) => Err(Error::Io(
            Stage::Launch,
            io::Error::new(io::ErrorKind::Other, "unexpected wait status"),
        )),
    }
}

/// Everything needed to drop privileges and `exec`, converted up front.
struct PreparedExec<'a> {
    identity: Option<&'a ResolvedIdentity>,
    workdir: Option<CString>,
    /// Paths to hand to `execve`, in order.
    candidates: Vec<CString>,
    argv: CStringArray,
    envp: CStringArray,
}

impl<'a> PreparedExec<'a> {
    fn new(options: &RunOptions<'a>, env: &Environment) -> Result<Self, Error> {
        let c_string = |bytes: &[u8], what: &str| {
            CString::new(bytes).map_err(|_| Error::LaunchFailed {
                program: options.program.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{what} contains a NUL byte"),
                ),
            })
        };

        // the program's own PATH decides where it is looked up
        let search_path = env
            .get(OsStr::new("PATH"))
            .map(|path| path.as_os_str())
            .unwrap_or_else(|| OsStr::new(env!("PYSU_PATH_DEFAULT")));

        let candidates = search_candidates(options.program, search_path)
            .iter()
            .map(|path| c_string(path.as_os_str().as_bytes(), "the program path"))
            .collect::<Result<Vec<_>, _>>()?;

        let mut argv = vec![c_string(options.program.as_os_str().as_bytes(), "the program")?];
        for arg in options.arguments {
            argv.push(c_string(arg.as_bytes(), "an argument")?);
        }

        let mut envp = Vec::with_capacity(env.len());
        for (key, value) in env {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            envp.push(c_string(&entry, "the environment")?);
        }

        let workdir = options
            .chdir
            .map(|dir| c_string(dir.as_os_str().as_bytes(), "the working directory"))
            .transpose()?;

        Ok(PreparedExec {
            identity: options.identity,
            workdir,
            candidates,
            argv: CStringArray::new(argv),
            envp: CStringArray::new(envp),
        })
    }

    /// Drop privileges, change directory and `execve` the first candidate that can be run.
    ///
    /// Only returns on failure. Does not allocate or log, so it can run in a forked child.
    fn exec(&self) -> ChildFailure {
        if let Some(identity) = self.identity {
            if let Err(CredentialFailure { stage, source }) =
                drop_privileges(&mut ProcessCredentials, identity)
            {
                let step = match stage {
                    Stage::DropGroups => ChildStep::DropGroups,
                    Stage::DropGid => ChildStep::DropGid,
                    _ => ChildStep::DropUid,
                };
                return ChildFailure::new(step, &source);
            }
        }

        if let Some(dir) = &self.workdir {
            if let Err(err) = chdir(dir) {
                return ChildFailure::new(ChildStep::Chdir, &err);
            }
        }

        // the candidates are tried with the new credentials, so `execve` does the access checks
        let mut errno = libc::ENOENT;
        for candidate in &self.candidates {
            let err = execve(candidate, &self.argv, &self.envp);
            match err.raw_os_error() {
                Some(libc::ENOENT | libc::ENOTDIR) => {}
                Some(libc::EACCES) => errno = libc::EACCES,
                _ => return ChildFailure::new(ChildStep::Exec, &err),
            }
        }

        ChildFailure {
            step: ChildStep::Exec,
            errno,
        }
    }
}

// checks whether the Path is actually describing a qualified path (i.e. contains "/")
// or just specifying the name of a file (in which case we are going to resolve it via PATH)
fn is_qualified(path: &Path) -> bool {
    path.parent() != Some(Path::new(""))
}

/// The paths `program` may be found at: itself when it contains a `/`, otherwise one per absolute
/// entry of `search_path`. Relative entries are skipped.
fn search_candidates(program: &Path, search_path: &OsStr) -> Vec<PathBuf> {
    if is_qualified(program) {
        return vec![program.to_path_buf()];
    }

    std::env::split_paths(search_path)
        // ignore all relative paths ("", "." or "./")
        .filter(|dir| dir.is_absolute())
        .map(|dir| dir.join(program))
        .collect()
}

/// What a forked child was doing when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildStep {
    DropGroups,
    DropGid,
    DropUid,
    Chdir,
    Exec,
}

const STEPS: [ChildStep; 5] = [
    ChildStep::DropGroups,
    ChildStep::DropGid,
    ChildStep::DropUid,
    ChildStep::Chdir,
    ChildStep::Exec,
];

impl ChildStep {
    fn stage(self) -> Stage {
        match self {
            ChildStep::DropGroups => Stage::DropGroups,
            ChildStep::DropGid => Stage::DropGid,
            ChildStep::DropUid => Stage::DropUid,
            ChildStep::Chdir | ChildStep::Exec => Stage::Launch,
        }
    }
}

/// Why a forked child did not get to run the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChildFailure {
    step: ChildStep,
    errno: i32,
}

impl ChildFailure {
    fn new(step: ChildStep, err: &io::Error) -> ChildFailure {
        ChildFailure {
            step,
            errno: err.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// The exit code of [`Self::into_error`], worked out without allocating.
    fn exit_code(&self) -> i32 {
        match self.step {
            ChildStep::DropGroups if self.errno == libc::EINVAL => 5,
            ChildStep::DropGroups | ChildStep::DropGid | ChildStep::DropUid => 6,
            ChildStep::Chdir => 1,
            ChildStep::Exec if self.errno == libc::ENOENT => 127,
            ChildStep::Exec => 126,
        }
    }

    fn into_error(self, options: &RunOptions) -> Error {
        let source = io::Error::from_raw_os_error(self.errno);
        match self.step {
            ChildStep::DropGroups | ChildStep::DropGid | ChildStep::DropUid => {
                let group_count = options.identity.map_or(0, |identity| identity.groups.len());
                let failure = CredentialFailure {
                    stage: self.step.stage(),
                    source,
                };
                credential_error(failure, group_count)
            }
            ChildStep::Chdir => {
                let dir = options.chdir.unwrap_or(Path::new("."));
                Error::Io(
                    Stage::Launch,
                    io::Error::new(
                        source.kind(),
                        format!("cannot change directory to '{}': {source}", dir.display()),
                    ),
                )
            }
            ChildStep::Exec => Error::LaunchFailed {
                program: options.program.to_path_buf(),
                source,
            },
        }
    }
}

impl DeSerialize for ChildFailure {
    type Bytes = [u8; 5];

    fn serialize(&self) -> Self::Bytes {
        let step = STEPS.iter().position(|s| *s == self.step).unwrap_or(0) as u8;
        let [a, b, c, d] = self.errno.to_ne_bytes();
        [step, a, b, c, d]
    }

    fn deserialize(bytes: Self::Bytes) -> Self {
        let [step, a, b, c, d] = bytes;
        ChildFailure {
            step: STEPS
                .get(usize::from(step))
                .copied()
                .unwrap_or(ChildStep::Exec),
            errno: i32::from_ne_bytes([a, b, c, d]),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ffi::OsString,
        io,
        path::{Path, PathBuf},
    };

    use pretty_assertions::assert_eq;

    use super::{
        exec_command, run_command, search_candidates, ChildFailure, ChildStep, ExitReason,
        RunOptions, STEPS,
    };
    use crate::{
        common::{
            bin_serde::{BinPipe, DeSerialize},
            Environment, Error, Stage,
        },
        identity::{CurrentProcess, ResolvedIdentity},
        system::{
            interface::{GroupId, UserId},
            real_uid,
        },
    };

    fn sh_env() -> Environment {
        [("PATH", "/usr/bin:/bin")]
            .into_iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    fn run_sh(script: &str, chdir: Option<&Path>) -> Result<ExitReason, Error> {
        let arguments = sh(script);
        let options = RunOptions {
            program: Path::new("sh"),
            arguments: &arguments,
            chdir,
            identity: None,
        };
        run_command(&options, sh_env())
    }

    #[test]
    fn exit_code_is_passed_through() {
        assert_eq!(run_sh("exit 3", None).unwrap(), ExitReason::Code(3));
        assert_eq!(run_sh("true", None).unwrap(), ExitReason::Code(0));
    }

    #[test]
    fn signals_map_to_128_plus_signal() {
        let reason = run_sh("kill -TERM $$", None).unwrap();
        assert_eq!(reason, ExitReason::Signal(libc::SIGTERM));
        assert_eq!(reason.exit_code(), 143);
    }

    #[test]
    fn environment_is_exactly_what_was_given() {
        let reason = run_sh(r#"test "$PATH" = /usr/bin:/bin && test -z "$HOME""#, None).unwrap();
        assert_eq!(reason, ExitReason::Code(0));
    }

    #[test]
    fn argv0_is_the_program_as_given() {
        let reason = run_sh(r#"test "$0" = sh"#, None).unwrap();
        assert_eq!(reason, ExitReason::Code(0));
    }

    #[test]
    fn workdir_is_applied() {
        let reason = run_sh(r#"test "$(pwd)" = /"#, Some(Path::new("/"))).unwrap();
        assert_eq!(reason, ExitReason::Code(0));
    }

    #[test]
    fn missing_workdir_is_reported_by_the_child() {
        let err = run_sh("true", Some(Path::new("/pysu/no/such/dir"))).unwrap_err();
        assert!(matches!(&err, Error::Io(Stage::Launch, _)));
        assert_eq!(err.exit_code(), 1);
        assert!(err
            .to_string()
            .contains("cannot change directory to '/pysu/no/such/dir'"));
    }

    #[test]
    fn missing_program_is_reported_by_the_child() {
        let options = RunOptions {
            program: Path::new("pysu-no-such-program"),
            arguments: &[],
            chdir: None,
            identity: None,
        };
        let err = run_command(&options, sh_env()).unwrap_err();
        assert!(matches!(&err, Error::LaunchFailed { program, .. } if program == Path::new("pysu-no-such-program")));
        assert_eq!(err.exit_code(), 127);
        assert_eq!(err.to_string(), "'pysu-no-such-program': command not found");
    }

    #[test]
    fn non_executable_file_cannot_be_launched() {
        let options = RunOptions {
            program: Path::new("/etc/passwd"),
            arguments: &[],
            chdir: None,
            identity: None,
        };
        let err = run_command(&options, sh_env()).unwrap_err();
        assert_eq!(err.exit_code(), 126);
    }

    #[test]
    fn nul_bytes_are_rejected_before_forking() {
        let arguments = vec![OsString::from("-c"), OsString::from("tr\0ue")];
        let options = RunOptions {
            program: Path::new("sh"),
            arguments: &arguments,
            chdir: None,
            identity: None,
        };
        let err = run_command(&options, sh_env()).unwrap_err();
        match &err {
            Error::LaunchFailed { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
                assert_eq!(source.to_string(), "an argument contains a NUL byte");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 126);

        let mut env = sh_env();
        env.insert("BAD".into(), "a\0b".into());
        let options = RunOptions {
            program: Path::new("/pysu/no/such/program"),
            arguments: &[],
            ..options
        };
        match exec_command(&options, env) {
            Error::LaunchFailed { source, .. } => {
                assert_eq!(source.to_string(), "the environment contains a NUL byte")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn replace_mode_returns_launch_failures() {
        let options = RunOptions {
            program: Path::new("/pysu/no/such/program"),
            arguments: &[],
            chdir: None,
            identity: None,
        };
        let err = exec_command(&options, sh_env());
        assert!(matches!(err, Error::LaunchFailed { .. }));
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn child_drops_before_running() {
        let current = CurrentProcess::snapshot().unwrap();
        let mut groups = vec![current.gid];
        groups.extend(current.groups.iter().filter(|gid| **gid != current.gid));
        let identity = ResolvedIdentity {
            uid: current.uid,
            gid: current.gid,
            groups,
            home: PathBuf::from("/pysu-home"),
        };

        let mut arguments = sh(r#"test "$HOME" = /pysu-home && test "$(id -u)" = "$1""#);
        arguments.push("sh".into());
        arguments.push(current.uid.to_string().into());
        let options = RunOptions {
            program: Path::new("sh"),
            arguments: &arguments,
            chdir: None,
            identity: Some(&identity),
        };

        let result = run_command(&options, sh_env());
        if real_uid() == UserId::ROOT {
            assert_eq!(result.unwrap(), ExitReason::Code(0));
        } else {
            // setgroups needs CAP_SETGID, even to set the groups we already have
            let err = result.unwrap_err();
            assert_eq!(err.stage(), Stage::DropGroups);
            assert_eq!(err.exit_code(), 6);
        }
    }

    #[test]
    fn candidates_follow_the_given_path() {
        assert_eq!(
            search_candidates(Path::new("sh"), "/usr/bin:/bin".as_ref()),
            vec![PathBuf::from("/usr/bin/sh"), PathBuf::from("/bin/sh")]
        );
        assert_eq!(
            search_candidates(Path::new("sh"), "relative:.::/bin".as_ref()),
            vec![PathBuf::from("/bin/sh")]
        );
        assert!(search_candidates(Path::new("sh"), "".as_ref()).is_empty());
        assert_eq!(
            search_candidates(Path::new("./sh"), "/bin".as_ref()),
            vec![PathBuf::from("./sh")]
        );
    }

    #[test]
    fn child_failure_survives_the_pipe() {
        let (mut tx, mut rx) = BinPipe::<ChildFailure>::pair().unwrap();
        let failure = ChildFailure {
            step: ChildStep::DropUid,
            errno: libc::EPERM,
        };
        tx.write(&failure).unwrap();
        assert_eq!(rx.read().unwrap(), Some(failure));

        // unknown steps decode as an exec failure
        assert_eq!(
            ChildFailure::deserialize([200, 0, 0, 0, 0]).step,
            ChildStep::Exec
        );
    }

    #[test]
    fn child_failures_map_to_errors_at_every_step() {
        let identity = ResolvedIdentity {
            uid: UserId::new(5),
            gid: GroupId::new(60),
            groups: vec![GroupId::new(60), GroupId::new(100), GroupId::new(200)],
            home: PathBuf::from("/usr/games"),
        };
        let options = RunOptions {
            program: Path::new("prog"),
            arguments: &[],
            chdir: Some(Path::new("/srv")),
            identity: Some(&identity),
        };

        let table = [
            (ChildStep::DropGroups, libc::EINVAL, Stage::DropGroups, 5),
            (ChildStep::DropGroups, libc::EPERM, Stage::DropGroups, 6),
            (ChildStep::DropGid, libc::EPERM, Stage::DropGid, 6),
            (ChildStep::DropGid, libc::EINVAL, Stage::DropGid, 6),
            (ChildStep::DropUid, libc::EAGAIN, Stage::DropUid, 6),
            (ChildStep::Chdir, libc::ENOENT, Stage::Launch, 1),
            (ChildStep::Exec, libc::ENOENT, Stage::Launch, 127),
            (ChildStep::Exec, libc::EACCES, Stage::Launch, 126),
        ];

        for (step, errno, stage, code) in table {
            let failure = ChildFailure::new(step, &io::Error::from_raw_os_error(errno));
            assert_eq!(failure, ChildFailure { step, errno });
            assert_eq!(failure.exit_code(), code, "{step:?} {errno}");
            assert_eq!(
                ChildFailure::deserialize(failure.serialize()),
                failure,
                "{step:?}"
            );

            let err = failure.into_error(&options);
            assert_eq!(err.stage(), stage, "{step:?} {errno}");
            assert_eq!(err.exit_code(), code, "{step:?} {errno}");
        }

        // every step is covered
        for step in STEPS {
            assert!(table.iter().any(|(s, ..)| *s == step), "{step:?}");
        }

        let err = ChildFailure::new(ChildStep::DropGroups, &io::Error::from_raw_os_error(libc::EINVAL))
            .into_error(&options);
        assert!(matches!(
            err,
            Error::TooManyGroups {
                stage: Stage::DropGroups,
                count: 3,
                ..
            }
        ));

        let err = ChildFailure::new(ChildStep::Chdir, &io::Error::from_raw_os_error(libc::ENOENT))
            .into_error(&options);
        assert_eq!(
            err.to_string(),
            format!(
                "launch: IO error: cannot change directory to '/srv': {}",
                io::Error::from_raw_os_error(libc::ENOENT)
            )
        );

        let err = ChildFailure::new(ChildStep::Exec, &io::Error::from_raw_os_error(libc::ENOENT))
            .into_error(&options);
        assert_eq!(err.to_string(), "'prog': command not found");
    }

    #[test]
    fn errors_without_an_errno_become_eio() {
        let failure = ChildFailure::new(
            ChildStep::Exec,
            &io::Error::new(io::ErrorKind::Other, "no errno"),
        );
        assert_eq!(failure.errno, libc::EIO);
        assert_eq!(failure.exit_code(), 126);
    }
}
