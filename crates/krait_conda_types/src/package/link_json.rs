//! The `info/link.json` file: entry points that must be generated when a
//! noarch python package is linked.

use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::PackageFile;

/// Describes python noarch specific entry points.
#[derive(Serialize, Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct PythonEntryPoints {
    /// A list of commands that wrap a python function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<EntryPoint>,
}

/// Links for specific types of noarch packages.
#[derive(Serialize, Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NoArchLinks {
    /// Entry points of a noarch python package.
    Python(PythonEntryPoints),

    /// A generic noarch package has no special links.
    Generic,
}

/// A representation of the `link.json` file found in noarch package
/// archives.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct LinkJson {
    /// Links for specific noarch packages.
    pub noarch: NoArchLinks,

    /// The version of the package metadata file.
    pub package_metadata_version: u64,
}

impl PackageFile for LinkJson {
    fn package_path() -> &'static Path {
        Path::new("info/link.json")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        serde_json::from_str(str).map_err(Into::into)
    }
}

/// A python entry point in the form `command = module:function`. At install
/// time a small script named `command` is generated that imports `module`
/// and calls `function`.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct EntryPoint {
    /// The name of the script that is generated.
    pub command: String,

    /// The module to import.
    pub module: String,

    /// The function within the module to call.
    pub function: String,
}

/// An error that can occur when parsing an [`EntryPoint`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("malformed entry point '{entry_point}', expected `command = module:function`")]
pub struct ParseEntryPointError {
    /// The string that could not be parsed.
    pub entry_point: String,
}

impl FromStr for EntryPoint {
    type Err = ParseEntryPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ParseEntryPointError {
            entry_point: s.to_owned(),
        };
        let (command, import) = s.split_once('=').ok_or_else(error)?;
        let (module, function) = import.split_once(':').ok_or_else(error)?;

        let command = command.trim();
        let module = module.trim();
        let function = function.trim();
        if command.is_empty() || module.is_empty() || function.is_empty() {
            return Err(error());
        }

        Ok(EntryPoint {
            command: command.to_owned(),
            module: module.to_owned(),
            function: function.to_owned(),
        })
    }
}

impl Display for EntryPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}:{}", self.command, self.module, self.function)
    }
}

impl Serialize for EntryPoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntryPoint {
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
    use super::{EntryPoint, LinkJson, NoArchLinks, PackageFile};

    #[test]
    fn parse_entry_point() {
        let entry_point: EntryPoint = "jupyter-lab = jupyterlab.labapp:main".parse().unwrap();
        assert_eq!(entry_point.command, "jupyter-lab");
        assert_eq!(entry_point.module, "jupyterlab.labapp");
        assert_eq!(entry_point.function, "main");

        assert!("no-equals-sign".parse::<EntryPoint>().is_err());
        assert!("cmd = missing_colon".parse::<EntryPoint>().is_err());
    }

    #[test]
    fn parse_link_json() {
        let link_json: LinkJson = PackageFile::from_str(
            r#"{
                "noarch": {
                    "type": "python",
                    "entry_points": ["wheel = wheel.cli:main"]
                },
                "package_metadata_version": 1
            }"#,
        )
        .unwrap();
        match link_json.noarch {
            NoArchLinks::Python(links) => {
                assert_eq!(links.entry_points.len(), 1);
                assert_eq!(links.entry_points[0].command, "wheel");
            }
            NoArchLinks::Generic => panic!("expected a python noarch"),
        }
    }
}
