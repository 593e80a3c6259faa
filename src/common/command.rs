use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

use crate::{
    exec::{exec_command, run_command, ExitReason, RunOptions},
    identity::{resolve, CurrentProcess, ParsedSpec, ResolvedIdentity},
    log::dev_info,
    system::SystemDatabase,
};

use super::{Environment, Error, Stage};

/// How [`Command::arg_from_env`] and [`Command::opt_from_env`] treat their variable.
#[derive(Debug, Clone, Default)]
pub struct FromEnv {
    default: Option<OsString>,
    required: bool,
    keep: bool,
}

impl FromEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value used when the variable is not set.
    pub fn default_value(mut self, value: impl Into<OsString>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Fail with [`Error::MissingEnvironment`] when the variable is not set and there is no
    /// default.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Leave the variable in the program's environment.
    pub fn keep(mut self) -> Self {
        self.keep = true;
        self
    }
}

/// A program to launch, optionally under another identity.
///
/// Starts out with the environment of the current process, no arguments and the current working
/// directory.
#[derive(Debug, Clone)]
pub struct Command {
    program: PathBuf,
    arguments: Vec<OsString>,
    env: Environment,
    identity: Option<ResolvedIdentity>,
    workdir: Option<PathBuf>,
}

impl Command {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Command {
            program: PathBuf::from(program.as_ref()),
            arguments: Vec::new(),
            env: std::env::vars_os().collect(),
            identity: None,
            workdir: None,
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.arguments.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        self.env
            .insert(key.as_ref().to_owned(), value.as_ref().to_owned());
        self
    }

    /// Removing a variable that is not set is not an error.
    pub fn env_remove(&mut self, key: impl AsRef<OsStr>) -> &mut Self {
        self.env.remove(key.as_ref());
        self
    }

    pub fn env_clear(&mut self) -> &mut Self {
        self.env.clear();
        self
    }

    /// Append the value of the variable `key` as an argument.
    pub fn arg_from_env(
        &mut self,
        key: impl AsRef<OsStr>,
        from_env: FromEnv,
    ) -> Result<&mut Self, Error> {
        if let Some(value) = self.take_env(key.as_ref(), from_env, || "an argument".into())? {
            self.arguments.push(value);
        }
        Ok(self)
    }

    /// Append `option` followed by the value of the variable `key`.
    pub fn opt_from_env(
        &mut self,
        option: impl AsRef<OsStr>,
        key: impl AsRef<OsStr>,
        from_env: FromEnv,
    ) -> Result<&mut Self, Error> {
        let option = option.as_ref();
        let purpose = || format!("option \"{}\"", option.to_string_lossy());
        if let Some(value) = self.take_env(key.as_ref(), from_env, purpose)? {
            self.arguments.push(option.to_owned());
            self.arguments.push(value);
        }
        Ok(self)
    }

    fn take_env(
        &mut self,
        key: &OsStr,
        from_env: FromEnv,
        purpose: impl FnOnce() -> String,
    ) -> Result<Option<OsString>, Error> {
        let value = if from_env.keep {
            self.env.get(key).cloned()
        } else {
            self.env.remove(key)
        };

        match value.or(from_env.default) {
            None if from_env.required => Err(Error::MissingEnvironment {
                variable: key.to_owned(),
                purpose: purpose(),
                program: self.program.clone(),
            }),
            value => Ok(value),
        }
    }

    /// Run the program as `spec` (`user[:group]`, either side optional).
    ///
    /// The spec is resolved right away against the system databases, so an unknown user or group
    /// is reported here rather than at launch.
    pub fn user(&mut self, spec: &str) -> Result<&mut Self, Error> {
        let spec = ParsedSpec::parse(spec)?;
        let current = CurrentProcess::snapshot().map_err(|err| Error::Io(Stage::ResolveUser, err))?;
        self.identity = Some(resolve(&spec, &SystemDatabase, &current)?);
        Ok(self)
    }

    /// Start the program in `dir`. The directory is not created.
    pub fn workdir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.workdir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn run_options(&self) -> RunOptions<'_> {
        RunOptions {
            program: &self.program,
            arguments: &self.arguments,
            chdir: self.workdir.as_deref(),
            identity: self.identity.as_ref(),
        }
    }

    /// Run the program in a child process and wait for it to finish.
    pub fn run(&self) -> Result<ExitReason, Error> {
        dev_info!("running {}", self.program.display());
        run_command(&self.run_options(), self.env.clone())
    }

    /// Replace the current process with the program. Only returns on failure.
    pub fn exec(&self) -> Error {
        dev_info!("executing {} in place", self.program.display());
        exec_command(&self.run_options(), self.env.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ffi::{OsStr, OsString},
        path::Path,
    };

    use pretty_assertions::assert_eq;

    use super::{Command, FromEnv};
    use crate::{
        common::{Error, Stage},
        exec::ExitReason,
        system::interface::UserId,
    };

    fn command() -> Command {
        let mut command = Command::new("prog");
        command
            .env_clear()
            .env("VOLUME", "/data")
            .env("NAME", "pysu");
        command
    }

    fn args(command: &Command) -> Vec<&str> {
        command
            .arguments
            .iter()
            .map(|arg| arg.to_str().unwrap())
            .collect()
    }

    fn var<'a>(command: &'a Command, key: &str) -> Option<&'a OsStr> {
        command.env.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    #[test]
    fn starts_from_the_process_environment() {
        let command = Command::new("prog");
        assert_eq!(command.env.len(), std::env::vars_os().count());
        assert!(command.arguments.is_empty());
    }

    #[test]
    fn arguments_accumulate() {
        let mut command = command();
        command.arg("-v").args(["a", "b"]);
        assert_eq!(args(&command), vec!["-v", "a", "b"]);
    }

    #[test]
    fn environment_edits() {
        let mut command = command();
        command.env("NAME", "other").env_remove("VOLUME").env_remove("UNSET");
        assert_eq!(var(&command, "NAME"), Some(OsStr::new("other")));
        assert_eq!(var(&command, "VOLUME"), None);
    }

    #[test]
    fn arg_from_env_moves_the_variable() {
        let mut command = command();
        command.arg_from_env("NAME", FromEnv::new()).unwrap();
        assert_eq!(args(&command), vec!["pysu"]);
        assert_eq!(var(&command, "NAME"), None);
    }

    #[test]
    fn arg_from_env_can_keep_the_variable() {
        let mut command = command();
        command.arg_from_env("NAME", FromEnv::new().keep()).unwrap();
        assert_eq!(args(&command), vec!["pysu"]);
        assert_eq!(var(&command, "NAME"), Some(OsStr::new("pysu")));
    }

    #[test]
    fn unset_variables_add_nothing_unless_defaulted() {
        let mut command = command();
        command
            .arg_from_env("UNSET", FromEnv::new())
            .unwrap()
            .arg_from_env("ALSO_UNSET", FromEnv::new().default_value("fallback").required())
            .unwrap();
        assert_eq!(args(&command), vec!["fallback"]);
    }

    #[test]
    fn opt_from_env_adds_option_and_value() {
        let mut command = command();
        command
            .opt_from_env("--volume", "VOLUME", FromEnv::new())
            .unwrap()
            .opt_from_env("--missing", "UNSET", FromEnv::new())
            .unwrap();
        assert_eq!(args(&command), vec!["--volume", "/data"]);
        assert_eq!(var(&command, "VOLUME"), None);
    }

    #[test]
    fn required_variables_must_be_set() {
        let err = command()
            .arg_from_env("UNSET", FromEnv::new().required())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "environment variable \"UNSET\" is required to determine an argument for program \"prog\""
        );
        assert_eq!(err.exit_code(), 7);

        let err = command()
            .opt_from_env("--volume", "UNSET", FromEnv::new().required())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "environment variable \"UNSET\" is required to determine option \"--volume\" for program \"prog\""
        );
    }

    #[test]
    fn user_resolves_immediately() {
        let mut command = command();
        command.user("root").unwrap();
        let identity = command.identity.as_ref().unwrap();
        assert_eq!(identity.uid, UserId::ROOT);
        assert_eq!(identity.home, Path::new("/root"));

        assert!(matches!(
            command.user("pysu_no_such_user"),
            Err(Error::UnknownUser(_))
        ));
        assert_eq!(command.user("a:b:c").unwrap_err().stage(), Stage::Parse);
    }

    #[test]
    fn run_without_path_uses_the_default_search_path() {
        let mut command = Command::new("sh");
        command.env_clear().args(["-c", "exit 4"]);
        assert_eq!(command.run().unwrap(), ExitReason::Code(4));
    }

    #[test]
    fn run_passes_arguments_from_the_environment() {
        let mut command = Command::new("sh");
        command
            .env_clear()
            .env("SCRIPT", r#"test "$0" = x && test -z "$SCRIPT""#)
            .arg("-c")
            .arg_from_env("SCRIPT", FromEnv::new())
            .unwrap()
            .arg("x")
            .workdir("/");
        assert_eq!(command.run().unwrap(), ExitReason::Code(0));
    }
}
