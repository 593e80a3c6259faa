use std::{ffi::OsString, mem};

#[cfg_attr(test, derive(Debug, PartialEq))]
pub enum PysuAction {
    Help(PysuHelpOptions),
    Version(PysuVersionOptions),
    Run(PysuRunOptions),
}

impl PysuAction {
    pub fn from_env() -> Result<Self, String> {
        PysuOptions::parse_arguments(std::env::args_os())?.validate()
    }
}

#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct PysuHelpOptions {}

impl TryFrom<PysuOptions> for PysuHelpOptions {
    type Error = String;

    fn try_from(mut opts: PysuOptions) -> Result<Self, Self::Error> {
        let help = mem::take(&mut opts.help);
        debug_assert!(help);
        reject_all("--help", opts)?;
        Ok(Self {})
    }
}

#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct PysuVersionOptions {}

impl TryFrom<PysuOptions> for PysuVersionOptions {
    type Error = String;

    fn try_from(mut opts: PysuOptions) -> Result<Self, Self::Error> {
        let version = mem::take(&mut opts.version);
        debug_assert!(version);
        reject_all("--version", opts)?;
        Ok(Self {})
    }
}

#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct PysuRunOptions {
    pub spec: String,
    pub program: OsString,
    pub arguments: Vec<OsString>,
}

impl TryFrom<PysuOptions> for PysuRunOptions {
    type Error = String;

    fn try_from(mut opts: PysuOptions) -> Result<Self, Self::Error> {
        let mut positional_args = mem::take(&mut opts.positional_args).into_iter();

        reject_all("run mode", opts)?;

        let spec = positional_args
            .next()
            .ok_or("missing user spec")?
            .into_string()
            .map_err(|spec| {
                format!(
                    "user spec '{}' is not valid UTF-8",
                    spec.to_string_lossy()
                )
            })?;
        let program = positional_args.next().ok_or("missing program")?;

        Ok(Self {
            spec,
            program,
            arguments: positional_args.collect(),
        })
    }
}

fn reject_all(context: &str, opts: PysuOptions) -> Result<(), String> {
    // exhaustive, so a new option cannot be forgotten here
    let PysuOptions {
        help,
        version,
        positional_args,
    } = opts;

    macro_rules! ensure_options_absent {
        ($($opt:ident,)*) => {
            $(if !$opt.is_absent() {
                let name = concat!("--", stringify!($opt)).replace('_', "-");
                return Err(format!("{context} conflicts with {name}"));
            })*
        };
    }

    ensure_options_absent! {
        help,
        version,
    };

    if !positional_args.is_absent() {
        return Err(format!("{context} conflicts with positional argument"));
    }

    Ok(())
}

trait IsAbsent {
    fn is_absent(&self) -> bool;
}

impl IsAbsent for bool {
    fn is_absent(&self) -> bool {
        !*self
    }
}

impl<T> IsAbsent for Vec<T> {
    fn is_absent(&self) -> bool {
        self.is_empty()
    }
}

#[derive(Debug, Default, PartialEq)]
pub(super) struct PysuOptions {
    // -h
    help: bool,
    // -V
    version: bool,

    positional_args: Vec<OsString>,
}

type OptionSetter = fn(&mut PysuOptions) -> Result<(), String>;

struct PysuOption {
    short: char,
    long: &'static str,
    set: OptionSetter,
}

impl PysuOptions {
    const PYSU_OPTIONS: &'static [PysuOption] = &[
        PysuOption {
            short: 'V',
            long: "version",
            set: |pysu_options| {
                if pysu_options.version {
                    Err(more_than_once("--version"))
                } else {
                    pysu_options.version = true;
                    Ok(())
                }
            },
        },
        PysuOption {
            short: 'h',
            long: "help",
            set: |pysu_options| {
                if pysu_options.help {
                    Err(more_than_once("--help"))
                } else {
                    pysu_options.help = true;
                    Ok(())
                }
            },
        },
    ];

    /// Parse pysu arguments into a PysuOptions struct.
    ///
    /// Options are only recognized before the user spec; the spec, the program and everything
    /// after them are taken verbatim.
    pub(super) fn parse_arguments(
        arguments: impl IntoIterator<Item = OsString>,
    ) -> Result<PysuOptions, String> {
        let mut options: PysuOptions = PysuOptions::default();
        let mut arg_iter = arguments.into_iter().skip(1);

        while let Some(arg) = arg_iter.next() {
            // options are plain ASCII, anything else starts the positional arguments
            let Some(text) = arg.to_str().filter(|text| text.starts_with('-') && *text != "-")
            else {
                options.positional_args.push(arg);
                options.positional_args.extend(arg_iter);
                break;
            };

            if text == "--" {
                // only positional arguments after this point
                options.positional_args.extend(arg_iter);
                break;
            } else if let Some(unprefixed) = text.strip_prefix("--") {
                if let Some((key, _)) = unprefixed.split_once('=') {
                    match Self::PYSU_OPTIONS.iter().find(|o| o.long == key) {
                        Some(option) => {
                            Err(format!("'--{}' does not take any arguments", option.long))?
                        }
                        None => Err(format!("unrecognized option '{text}'"))?,
                    }
                } else if let Some(option) = Self::PYSU_OPTIONS.iter().find(|o| o.long == unprefixed)
                {
                    (option.set)(&mut options)?;
                } else {
                    Err(format!("unrecognized option '{text}'"))?;
                }
            } else if let Some(unprefixed) = text.strip_prefix('-') {
                // flags can be grouped, so we loop over the the characters
                for curr in unprefixed.chars() {
                    match Self::PYSU_OPTIONS.iter().find(|o| o.short == curr) {
                        Some(option) => (option.set)(&mut options)?,
                        None => Err(format!("unrecognized option '{curr}'"))?,
                    }
                }
            }
        }

        Ok(options)
    }

    pub(super) fn validate(self) -> Result<PysuAction, String> {
        let action = if self.help {
            PysuAction::Help(self.try_into()?)
        } else if self.version {
            PysuAction::Version(self.try_into()?)
        } else {
            PysuAction::Run(self.try_into()?)
        };
        Ok(action)
    }
}

fn more_than_once(flag: &str) -> String {
    format!("'{flag}' was specified more than once")
}
