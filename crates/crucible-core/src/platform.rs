//! Target platform descriptors.
//!
//! Command rendering and path-list assembly are parameterized by a
//! platform descriptor so that the Linux and Windows variants of a job
//! express the same logical invocation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    /// Separator used when joining path-list environment variables.
    pub fn path_list_separator(&self) -> char {
        match self {
            Platform::Linux => ':',
            Platform::Windows => ';',
        }
    }

    /// Shell used to wrap a rendered command line.
    pub fn shell(&self) -> &'static str {
        match self {
            Platform::Linux => "sh",
            Platform::Windows => "powershell",
        }
    }

    /// Flag that makes the shell execute its argument as a command string.
    pub fn shell_command_flag(&self) -> &'static str {
        match self {
            Platform::Linux => "-c",
            Platform::Windows => "-Command",
        }
    }
}
