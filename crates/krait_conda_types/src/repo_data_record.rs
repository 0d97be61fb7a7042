//! Defines [`RepoDataRecord`]: a [`PackageRecord`] together with the
//! information where it came from.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::PackageRecord;

/// Information about a package from repodata. It includes a
/// [`PackageRecord`] and the source channel, filename and download url.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq, Hash)]
pub struct RepoDataRecord {
    /// The data stored in the repodata.json.
    #[serde(flatten)]
    pub package_record: PackageRecord,

    /// The filename of the package.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The canonical url from where the package can be downloaded.
    pub url: Url,

    /// The canonical name of the channel the package came from.
    pub channel: String,
}

impl AsRef<PackageRecord> for RepoDataRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.package_record
    }
}
