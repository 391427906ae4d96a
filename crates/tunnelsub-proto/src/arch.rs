//! CPU architecture normalization for binary downloads
//!
//! Every architecture string containing `arm`, plus `aarch64`, maps to
//! [`Arch::Arm64`]. Everything else maps to [`Arch::Amd64`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Arm64,
    Amd64,
}

impl Arch {
    /// Architecture of the running binary
    pub fn detect() -> Self {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Normalize a machine string such as `uname -m` output
    pub fn from_machine(machine: &str) -> Self {
        let machine = machine.trim().to_ascii_lowercase();
        if machine.contains("arm") || machine == "aarch64" {
            Arch::Arm64
        } else {
            Arch::Amd64
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::Amd64 => "amd64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
