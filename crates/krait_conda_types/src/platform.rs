//! Platforms (subdirs) supported by conda channels.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A platform supported by conda. Values correspond one to one with the
/// subdir names used by channels.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Platform {
    NoArch,

    Linux32,
    Linux64,
    LinuxAarch64,
    LinuxArmV6l,
    LinuxArmV7l,
    LinuxPpc64le,
    LinuxPpc64,
    LinuxS390X,
    LinuxRiscV64,

    Osx64,
    OsxArm64,

    Win32,
    Win64,
    WinArm64,
}

impl Platform {
    /// Returns the platform for which the current binary was compiled.
    pub fn current() -> Platform {
        if cfg!(all(target_os = "linux", target_arch = "x86")) {
            Platform::Linux32
        } else if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
            Platform::Linux64
        } else if cfg!(all(target_os = "linux", target_arch = "aarch64")) {
            Platform::LinuxAarch64
        } else if cfg!(all(target_os = "linux", target_arch = "arm")) {
            Platform::LinuxArmV7l
        } else if cfg!(all(target_os = "linux", target_arch = "powerpc64le")) {
            Platform::LinuxPpc64le
        } else if cfg!(all(target_os = "linux", target_arch = "powerpc64")) {
            Platform::LinuxPpc64
        } else if cfg!(all(target_os = "linux", target_arch = "s390x")) {
            Platform::LinuxS390X
        } else if cfg!(all(target_os = "linux", target_arch = "riscv64")) {
            Platform::LinuxRiscV64
        } else if cfg!(all(target_os = "macos", target_arch = "x86_64")) {
            Platform::Osx64
        } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            Platform::OsxArm64
        } else if cfg!(all(target_os = "windows", target_arch = "x86")) {
            Platform::Win32
        } else if cfg!(all(target_os = "windows", target_arch = "x86_64")) {
            Platform::Win64
        } else if cfg!(all(target_os = "windows", target_arch = "aarch64")) {
            Platform::WinArm64
        } else {
            panic!("the current platform is not a known conda platform")
        }
    }

    /// Returns a string representation of the platform, e.g. `linux-64`.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::NoArch => "noarch",
            Platform::Linux32 => "linux-32",
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::LinuxArmV6l => "linux-armv6l",
            Platform::LinuxArmV7l => "linux-armv7l",
            Platform::LinuxPpc64le => "linux-ppc64le",
            Platform::LinuxPpc64 => "linux-ppc64",
            Platform::LinuxS390X => "linux-s390x",
            Platform::LinuxRiscV64 => "linux-riscv64",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
            Platform::Win32 => "win-32",
            Platform::Win64 => "win-64",
            Platform::WinArm64 => "win-arm64",
        }
    }

    /// Returns true if the platform is a windows platform.
    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Win32 | Platform::Win64 | Platform::WinArm64)
    }

    /// Returns true if the platform is a unix (linux or macOS) platform.
    pub fn is_unix(self) -> bool {
        self.is_linux() | self.is_osx()
    }

    /// Returns true if the platform is a linux platform.
    pub fn is_linux(self) -> bool {
        matches!(
            self,
            Platform::Linux32
                | Platform::Linux64
                | Platform::LinuxAarch64
                | Platform::LinuxArmV6l
                | Platform::LinuxArmV7l
                | Platform::LinuxPpc64le
                | Platform::LinuxPpc64
                | Platform::LinuxS390X
                | Platform::LinuxRiscV64
        )
    }

    /// Returns true if the platform is a macOS platform.
    pub fn is_osx(self) -> bool {
        matches!(self, Platform::Osx64 | Platform::OsxArm64)
    }

    /// Returns true if the platform is the architecture independent `noarch`
    /// platform.
    pub fn is_noarch(self) -> bool {
        matches!(self, Platform::NoArch)
    }
}

/// An error that can occur when parsing a platform from a string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("'{string}' is not a known platform")]
pub struct ParsePlatformError {
    /// The string that could not be parsed.
    pub string: String,
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "noarch" => Platform::NoArch,
            "linux-32" => Platform::Linux32,
            "linux-64" => Platform::Linux64,
            "linux-aarch64" => Platform::LinuxAarch64,
            "linux-armv6l" => Platform::LinuxArmV6l,
            "linux-armv7l" => Platform::LinuxArmV7l,
            "linux-ppc64le" => Platform::LinuxPpc64le,
            "linux-ppc64" => Platform::LinuxPpc64,
            "linux-s390x" => Platform::LinuxS390X,
            "linux-riscv64" => Platform::LinuxRiscV64,
            "osx-64" => Platform::Osx64,
            "osx-arm64" => Platform::OsxArm64,
            "win-32" => Platform::Win32,
            "win-64" => Platform::Win64,
            "win-arm64" => Platform::WinArm64,
            string => {
                return Err(ParsePlatformError {
                    string: string.to_owned(),
                })
            }
        })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::Platform;

    #[test]
    fn test_roundtrip() {
        for platform in [
            Platform::NoArch,
            Platform::Linux64,
            Platform::OsxArm64,
            Platform::Win64,
        ] {
            assert_eq!(Platform::from_str(platform.as_str()).unwrap(), platform);
        }
    }

    #[test]
    fn test_unknown() {
        assert!(Platform::from_str("beos-64").is_err());
    }
}
