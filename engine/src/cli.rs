//! Utility module for command line interfaces

use std::{error::Error, fmt, fmt::Display};

/// An error struct to wrap simple static error messages
#[derive(Debug)]
pub struct CliErr(pub &'static str);

impl Display for CliErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Error for CliErr {}

/// Pull the next positional argument or fail with a static message.
pub fn positional(args: &mut impl Iterator<Item = String>, missing_msg: &'static str) -> Result<String, CliErr> {
    args.next().ok_or(CliErr(missing_msg))
}
