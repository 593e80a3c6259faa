pub const USAGE_MSG: &str = "Usage: pysu [options] [--] <user-spec> <program> [<argument>...]";

const EXAMPLES: &str = "   ie: pysu jamie bash
       pysu nobody:root bash -c 'whoami && id'
       pysu 1000:1 id";

const DESCRIPTOR: &str = "Run <program> as <user-spec>, given as <user>[:<group>] like the USER
instruction of a Dockerfile. Both sides may be a name or a numeric id and
both are optional: an omitted user keeps the current one, an omitted group
uses the primary and supplementary groups of the user. HOME is set to the
home directory of the user, the rest of the environment is kept as is.";

const HELP_MSG: &str = "Options:
-h, --help                      display this help
-V, --version                   display version
";

pub fn usage_message() -> String {
    format!("{USAGE_MSG}\n{EXAMPLES}\n")
}

pub fn long_help_message() -> String {
    format!("{USAGE_MSG}\n{EXAMPLES}\n\n{DESCRIPTOR}\n\n{HELP_MSG}")
}
