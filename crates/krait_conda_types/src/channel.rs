//! Channels: named sources of packages, backed by one or more URL roots.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::Platform;

/// The default alias under which short channel names are resolved.
const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// The `ChannelConfig` describes properties that are required to resolve
/// "simple" channel names (like `conda-forge`) to channel URLs.
#[derive(Debug, Clone, Serialize, Deserialize, Hash)]
pub struct ChannelConfig {
    /// A url to prefix to channel names that don't start with a url. The
    /// default value is <https://conda.anaconda.org>.
    pub channel_alias: Url,

    /// For local (file) channels, the root directory from which relative
    /// paths are resolved. Most of the time this is the current working
    /// directory.
    pub root_dir: PathBuf,
}

impl ChannelConfig {
    /// Create a new `ChannelConfig` with the default channel alias and the
    /// given root directory.
    pub fn default_with_root_dir(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            channel_alias: Url::from_str(DEFAULT_CHANNEL_ALIAS)
                .expect("could not parse default channel alias"),
        }
    }
}

/// `Channel`s are the primary source of package information.
///
/// A channel has a base url under which the per-platform subdirs live, and
/// optionally a short name (like `conda-forge`) when the base url lives under
/// the configured channel alias. Channel priority is not a property of the
/// channel itself but of its position in the list of channels handed to the
/// index (the first channel has the highest priority).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Channel {
    /// The platforms supported by this channel, or `None` for the default
    /// set (the current platform and `noarch`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<Platform>>,

    /// Base URL of the channel. Package subdirs live directly under it.
    pub base_url: Url,

    /// The name of the channel, if it could be derived from the url.
    pub name: Option<String>,
}

impl Channel {
    /// Parses a channel from a string. The string is either a url, an
    /// absolute path, or a simple name that is resolved using the channel
    /// alias from the config.
    pub fn from_str(
        str: impl AsRef<str>,
        config: &ChannelConfig,
    ) -> Result<Self, ParseChannelError> {
        let str = str.as_ref().trim();
        if str.is_empty() {
            return Err(ParseChannelError::Empty);
        }

        if str.contains("://") {
            let url = Url::parse(str).map_err(|e| ParseChannelError::InvalidUrl {
                url: str.to_owned(),
                source: e,
            })?;
            Ok(Channel::from_url(url, config))
        } else if str.starts_with('/') || str.starts_with("./") || str.starts_with("..") {
            let path = config.root_dir.join(str);
            let url = Url::from_directory_path(&path)
                .map_err(|()| ParseChannelError::InvalidPath(path.display().to_string()))?;
            Ok(Channel {
                platforms: None,
                base_url: url,
                name: Some(str.to_owned()),
            })
        } else {
            if let Some(c) = str.chars().find(|c| {
                !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '/' | '*')
            }) {
                return Err(ParseChannelError::InvalidCharacter(c));
            }
            Ok(Channel::from_name(str, config))
        }
    }

    /// Constructs a channel from a simple name using the alias from the
    /// config.
    pub fn from_name(name: &str, config: &ChannelConfig) -> Self {
        let name = name.trim_matches('/');
        let mut base_url = config.channel_alias.clone();
        if let Ok(mut segments) = base_url.path_segments_mut() {
            for segment in name.split('/') {
                segments.push(segment);
            }
        }
        Self {
            platforms: None,
            base_url,
            name: Some(name.to_owned()),
        }
    }

    /// Constructs a channel from a base url, deriving the name when the url
    /// lives under the configured channel alias.
    pub fn from_url(url: Url, config: &ChannelConfig) -> Self {
        let name = url
            .as_str()
            .strip_prefix(config.channel_alias.as_str())
            .map(|stripped| stripped.trim_matches('/').to_owned())
            .filter(|name| !name.is_empty());
        Self {
            platforms: None,
            base_url: url,
            name,
        }
    }

    /// Returns the base url of the channel.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the canonical name of the channel: the short name when one is
    /// known, the full url otherwise.
    pub fn canonical_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.base_url.as_str().trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the name of the channel as it would be written by a user.
    pub fn name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => self.base_url.as_str(),
        }
    }

    /// Returns the url of the subdir of this channel for the given platform.
    pub fn platform_url(&self, platform: Platform) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(platform.as_str());
        }
        url
    }

    /// Returns the platforms the channel serves, defaulting to the current
    /// platform plus `noarch`.
    pub fn platforms_or_default(&self) -> Vec<Platform> {
        match &self.platforms {
            Some(platforms) => platforms.clone(),
            None => vec![Platform::current(), Platform::NoArch],
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

/// An error that can occur when parsing a channel from a string.
#[derive(Debug, Error)]
pub enum ParseChannelError {
    /// The channel string was empty.
    #[error("the channel string was empty")]
    Empty,

    /// The channel url could not be parsed.
    #[error("could not parse channel url '{url}'")]
    InvalidUrl {
        /// The url that failed to parse.
        url: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// The channel path could not be converted to a url.
    #[error("could not convert path '{0}' to a channel url")]
    InvalidPath(String),

    /// The channel name contains a character that is not allowed.
    #[error("'{0}' is not allowed in a channel name")]
    InvalidCharacter(char),
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::{Channel, ChannelConfig};

    fn config() -> ChannelConfig {
        ChannelConfig::default_with_root_dir(PathBuf::from("/tmp"))
    }

    #[test]
    fn parse_by_name() {
        let channel = Channel::from_str("conda-forge", &config()).unwrap();
        assert_eq!(
            channel.base_url.as_str(),
            "https://conda.anaconda.org/conda-forge"
        );
        assert_eq!(channel.name(), "conda-forge");
        assert_eq!(channel.canonical_name(), "conda-forge");
    }

    #[test]
    fn parse_by_url() {
        let channel =
            Channel::from_str("https://conda.anaconda.org/conda-forge", &config()).unwrap();
        assert_eq!(channel.name(), "conda-forge");

        let channel = Channel::from_str("https://repo.example.com/main", &config()).unwrap();
        assert_eq!(channel.name, None);
        assert_eq!(channel.canonical_name(), "https://repo.example.com/main");
    }

    #[test]
    fn parse_invalid() {
        assert!(Channel::from_str("", &config()).is_err());
        assert!(Channel::from_str("conda forge", &config()).is_err());
    }

    #[test]
    fn platform_url() {
        let channel = Channel::from_str("conda-forge", &config()).unwrap();
        assert_eq!(
            channel
                .platform_url(crate::Platform::Linux64)
                .as_str(),
            "https://conda.anaconda.org/conda-forge/linux-64"
        );
    }
}
