//! Library name parsing and platform naming conventions.
//!
//! A generic library name is `<base>.major[.minor[...]]`, with the
//! version carried as a trailing run of dot-separated integer groups.
//! Platform-explicit names (`libfoo.so.1.2`, `libfoo.1.2.dylib`,
//! `foo.1.2.dll`) parse directly into a concrete system type.
//! Compatibility rule: same basename and major version, advertised
//! minor at or above the requested one.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{FetchError, Result};

/// Operating system / architecture lattice for native libraries.
///
/// Concrete members name an exact platform; general members stand for
/// every concrete platform below them. `Generic` covers all platforms
/// and `Unknown` none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemType {
    Unknown,
    Generic,
    Linux,
    Linux32,
    Linux64,
    Windows,
    Windows32,
    Windows64,
    MacOS,
    MacOS64,
}

impl SystemType {
    /// Immediate concrete subtypes of a general type.
    pub fn subtypes(&self) -> &'static [SystemType] {
        match self {
            SystemType::Generic => &[
                SystemType::Linux32,
                SystemType::Linux64,
                SystemType::Windows32,
                SystemType::Windows64,
                SystemType::MacOS64,
            ],
            SystemType::Linux => &[SystemType::Linux32, SystemType::Linux64],
            SystemType::Windows => &[SystemType::Windows32, SystemType::Windows64],
            SystemType::MacOS => &[SystemType::MacOS64],
            _ => &[],
        }
    }

    /// Whether `self` is covered by `other` in the lattice.
    pub fn is_instance_of(&self, other: SystemType) -> bool {
        if *self == other {
            return true;
        }
        if other == SystemType::Generic {
            return *self != SystemType::Unknown;
        }
        other.subtypes().contains(self)
    }

    pub fn is_concrete(&self) -> bool {
        matches!(
            self,
            SystemType::Linux32
                | SystemType::Linux64
                | SystemType::Windows32
                | SystemType::Windows64
                | SystemType::MacOS64
        )
    }

    /// Concrete type of the running process, from compile-time target
    /// information.
    pub fn current() -> SystemType {
        #[cfg(all(target_os = "linux", target_pointer_width = "64"))]
        return SystemType::Linux64;
        #[cfg(all(target_os = "linux", target_pointer_width = "32"))]
        return SystemType::Linux32;
        #[cfg(all(target_os = "windows", target_pointer_width = "64"))]
        return SystemType::Windows64;
        #[cfg(all(target_os = "windows", target_pointer_width = "32"))]
        return SystemType::Windows32;
        #[cfg(target_os = "macos")]
        return SystemType::MacOS64;
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        return SystemType::Unknown;
    }

    /// Platform directory under the managed library root. Defined for
    /// concrete types only.
    pub fn dir_name(&self) -> Option<&'static str> {
        match self {
            SystemType::Linux32 => Some("Linux32"),
            SystemType::Linux64 => Some("Linux64"),
            SystemType::Windows32 => Some("Windows32"),
            SystemType::Windows64 => Some("Windows64"),
            SystemType::MacOS64 => Some("MacOS64"),
            _ => None,
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemType::Unknown => "Unknown",
            SystemType::Generic => "Generic",
            SystemType::Linux => "Linux",
            SystemType::Linux32 => "Linux32",
            SystemType::Linux64 => "Linux64",
            SystemType::Windows => "Windows",
            SystemType::Windows32 => "Windows32",
            SystemType::Windows64 => "Windows64",
            SystemType::MacOS => "MacOS",
            SystemType::MacOS64 => "MacOS64",
        };
        f.write_str(name)
    }
}

fn generic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)((?:\.\d+)+)$").unwrap())
}

fn linux_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^lib(.+?)\.so((?:\.\d+)*)$").unwrap())
}

fn macos_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^lib(.+?)((?:\.\d+)*)\.dylib$").unwrap())
}

fn windows_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)((?:\.\d+)*)\.dll$").unwrap())
}

/// Parsed library descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibDesc {
    base: String,
    major: Option<u32>,
    minor: Option<u32>,
    sys: SystemType,
}

fn split_version(version: &str) -> (Option<u32>, Option<u32>) {
    let mut nums = version.split('.').filter(|s| !s.is_empty());
    let major = nums.next().and_then(|s| s.parse().ok());
    let minor = match major {
        Some(_) => nums.next().and_then(|s| s.parse().ok()),
        None => None,
    };
    (major, minor)
}

impl LibDesc {
    /// Parse a generic or platform-explicit library name.
    pub fn parse(name: &str) -> Result<LibDesc> {
        let (base, version, sys) = if let Some(caps) = linux_re().captures(name) {
            (caps[1].to_string(), caps[2].to_string(), SystemType::Linux)
        } else if let Some(caps) = macos_re().captures(name) {
            (caps[1].to_string(), caps[2].to_string(), SystemType::MacOS)
        } else if let Some(caps) = windows_re().captures(name) {
            (caps[1].to_string(), caps[2].to_string(), SystemType::Windows)
        } else if let Some(caps) = generic_re().captures(name) {
            (caps[1].to_string(), caps[2].to_string(), SystemType::Generic)
        } else {
            (name.to_string(), String::new(), SystemType::Generic)
        };

        if base.is_empty() {
            return Err(FetchError::syntax(name, "library name has no basename"));
        }
        let (major, minor) = split_version(&version);
        Ok(LibDesc {
            base,
            major,
            minor,
            sys,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn major(&self) -> Option<u32> {
        self.major
    }

    pub fn minor(&self) -> Option<u32> {
        self.minor
    }

    /// System family the name was written for. `Generic` for plain
    /// `<base>.major.minor` names.
    pub fn sys(&self) -> SystemType {
        self.sys
    }

    fn version_suffix(&self) -> String {
        match (self.major, self.minor) {
            (Some(major), Some(minor)) => format!(".{major}.{minor}"),
            (Some(major), None) => format!(".{major}"),
            _ => String::new(),
        }
    }

    /// Physical filename for a concrete platform.
    pub fn file_name(&self, sys: SystemType) -> Result<String> {
        let ver = self.version_suffix();
        match sys {
            SystemType::Linux32 | SystemType::Linux64 => Ok(format!("lib{}.so{ver}", self.base)),
            SystemType::MacOS64 => Ok(format!("lib{}{ver}.dylib", self.base)),
            SystemType::Windows32 | SystemType::Windows64 => Ok(format!("{}{ver}.dll", self.base)),
            other => Err(FetchError::syntax(
                other.to_string(),
                "not a concrete platform",
            )),
        }
    }

    /// If `file_name` advertises a library compatible with this
    /// request (same basename and major, for platform `sys`), returns
    /// its advertised minor version (0 when unversioned).
    pub fn compatible_minor(&self, file_name: &str, sys: SystemType) -> Option<u32> {
        let candidate = LibDesc::parse(file_name).ok()?;
        if !sys.is_instance_of(candidate.sys) {
            return None;
        }
        if candidate.base != self.base || candidate.major != self.major {
            return None;
        }
        Some(candidate.minor.unwrap_or(0))
    }
}

impl fmt::Display for LibDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.version_suffix())
    }
}
