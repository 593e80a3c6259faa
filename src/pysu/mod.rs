use crate::common::{Command, Error};
use crate::log::{dev_info, user_error};

use cli::{PysuAction, PysuRunOptions};
use help::{long_help_message, usage_message};

mod cli;
mod help;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Switch to the requested identity and replace this process with the program.
fn run(options: PysuRunOptions) -> Result<(), Error> {
    dev_info!("pysu {} {:?}", options.spec, options.program);

    let mut command = Command::new(&options.program);
    command.args(&options.arguments).user(&options.spec)?;

    Err(command.exec())
}

/// Carry out `action` and work out the status pysu exits with, when it exits at all.
fn exit_code_for(action: Result<PysuAction, String>) -> i32 {
    let action = match action {
        Ok(action) => action,
        Err(error) => {
            println_ignore_io_error!("pysu: {error}\n{}", usage_message());
            return 1;
        }
    };

    match action {
        PysuAction::Help(_) => {
            println_ignore_io_error!("{}", long_help_message());
            0
        }
        PysuAction::Version(_) => {
            println_ignore_io_error!("pysu-rs {VERSION}");
            0
        }
        PysuAction::Run(options) => match run(options) {
            Ok(()) => 0,
            Err(error) => {
                user_error!("{error}");
                error.exit_code()
            }
        },
    }
}

pub fn main() {
    crate::log::PysuLogger::new("pysu: ").into_global_logger();

    std::process::exit(exit_code_for(PysuAction::from_env()));
}
