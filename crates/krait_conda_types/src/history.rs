//! Readers and writers for `conda-meta/history` files.
//!
//! Every environment keeps an append-only ledger of the changes made to it.
//! Each revision starts with a `==> <datetime> <==` header, followed by
//! comment lines (the command that was run and the specs that were
//! requested) and the package diff: distribution strings prefixed with `+`
//! (linked) or `-` (unlinked), or bare strings for the initial revision.
//!
//! The ledger is what allows the solver to respect what the user asked for
//! in earlier transactions: [`ParsedHistory::requested_specs`] folds all
//! revisions into the set of specs that is currently in effect.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use fs_err::OpenOptions;
use std::io::Write;

use crate::{MatchSpec, ParseMatchSpecError};

/// A single parsed revision of a history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRevision {
    /// The datetime string from the revision header.
    pub timestamp: String,

    /// Distribution strings prefixed with `+`/`-`, or bare for the initial
    /// revision.
    pub packages: BTreeSet<String>,

    /// Raw comment lines, including the leading `#`.
    pub comments: Vec<String>,
}

/// Structured data extracted from the comment lines of a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRequest {
    /// The datetime string from the revision header.
    pub date: String,

    /// The command that was run (from `# cmd: ...`).
    pub cmd: Option<String>,

    /// The action that was performed: `install`, `remove`, `create`, ...
    pub action: Option<String>,

    /// Specs for install/update/create actions.
    pub update_specs: Vec<String>,

    /// Specs for remove/uninstall actions.
    pub remove_specs: Vec<String>,

    /// The channels that were configured when the action ran (from
    /// `# channels: ...`).
    pub channels: Vec<String>,
}

/// Errors that can occur when working with history files.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// A spec recorded in the history could not be parsed.
    #[error("invalid spec in history: {0}")]
    InvalidSpec(#[from] ParseMatchSpecError),
}

/// The parsed contents of a history file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHistory {
    /// The revisions in the order they appear in the file.
    pub revisions: Vec<HistoryRevision>,
}

impl ParsedHistory {
    /// Returns the number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Returns `true` if there are no revisions.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Returns the latest revision, if any.
    pub fn latest(&self) -> Option<&HistoryRevision> {
        self.revisions.last()
    }

    /// Extracts a [`UserRequest`] for every revision that has a `# cmd:`
    /// comment.
    pub fn user_requests(&self) -> Vec<UserRequest> {
        let cmd_re = lazy_regex::regex!(r"^#\s*cmd:\s*(.+)$");
        let spec_re = lazy_regex::regex!(r"^#\s*(\w+)\s+specs:\s*(.+)?$");
        let channels_re = lazy_regex::regex!(r"^#\s*channels:\s*(.+)$");

        let mut requests = Vec::new();
        for revision in &self.revisions {
            let mut request = UserRequest {
                date: revision.timestamp.clone(),
                ..UserRequest::default()
            };

            for comment in &revision.comments {
                if let Some(caps) = cmd_re.captures(comment) {
                    request.cmd = Some(caps[1].to_owned());
                }
                if let Some(caps) = channels_re.captures(comment) {
                    request.channels = caps[1]
                        .split(',')
                        .map(|c| c.trim().to_owned())
                        .filter(|c| !c.is_empty())
                        .collect();
                }
                if let Some(caps) = spec_re.captures(comment) {
                    let action = caps[1].to_owned();
                    let specs = caps
                        .get(2)
                        .map(|m| parse_specs_list(m.as_str()))
                        .unwrap_or_default();
                    match action.as_str() {
                        "install" | "create" | "update" => request.update_specs = specs,
                        "remove" | "uninstall" => request.remove_specs = specs,
                        _ => {}
                    }
                    request.action = Some(action);
                }
            }

            if request.cmd.is_some() || request.action.is_some() {
                requests.push(request);
            }
        }
        requests
    }

    /// Returns the set of user-requested specs that is currently in effect:
    /// the union of the specs of every install/create/update action minus
    /// every spec whose package was later explicitly removed. When the same
    /// package is requested multiple times the newest form of the spec wins.
    pub fn requested_specs(&self) -> Result<Vec<MatchSpec>, HistoryError> {
        // Keyed by package name so a newer request replaces an older one.
        let mut effective: Vec<(String, MatchSpec)> = Vec::new();

        for request in self.user_requests() {
            for spec_str in &request.update_specs {
                let spec = MatchSpec::from_str(spec_str)?;
                let Some(name) = spec.name.as_ref().map(|n| n.as_normalized().to_owned())
                else {
                    continue;
                };
                effective.retain(|(existing, _)| existing != &name);
                effective.push((name, spec));
            }
            for spec_str in &request.remove_specs {
                let spec = MatchSpec::from_str(spec_str)?;
                if let Some(name) = spec.name.as_ref().map(|n| n.as_normalized().to_owned()) {
                    effective.retain(|(existing, _)| existing != &name);
                }
            }
        }

        Ok(effective.into_iter().map(|(_, spec)| spec).collect())
    }
}

/// Splits a `specs:` comment into individual spec strings. The list is
/// either python-ish (`['numpy', 'python >=3']`) or comma separated.
fn parse_specs_list(input: &str) -> Vec<String> {
    input
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|spec| spec.trim().trim_matches(|c| c == '\'' || c == '"').to_owned())
        .filter(|spec| !spec.is_empty())
        .collect()
}

/// Read and write access to the `conda-meta/history` file of a prefix.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    /// Creates a new `History` pointing at `<prefix>/conda-meta/history`.
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self {
            path: prefix.as_ref().join("conda-meta").join("history"),
        }
    }

    /// Creates a `History` from an explicit path to a history file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the history file. A missing file parses as an empty history.
    pub fn parse(&self) -> Result<ParsedHistory, HistoryError> {
        if !self.path.exists() {
            return Ok(ParsedHistory::default());
        }
        let contents = fs_err::read_to_string(&self.path)?;
        Self::parse_str(&contents)
    }

    /// Parses a history file from a reader.
    pub fn from_reader(mut reader: impl Read) -> Result<ParsedHistory, HistoryError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::parse_str(&contents)
    }

    /// Parses the contents of a history file. Comments appearing before the
    /// first revision header are ignored.
    pub fn parse_str(contents: &str) -> Result<ParsedHistory, HistoryError> {
        let header_re = lazy_regex::regex!(r"^==>\s*(.+?)\s*<==$");

        let mut revisions = Vec::new();
        let mut current: Option<HistoryRevision> = None;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(caps) = header_re.captures(line) {
                if let Some(revision) = current.take() {
                    revisions.push(revision);
                }
                current = Some(HistoryRevision {
                    timestamp: caps[1].to_owned(),
                    packages: BTreeSet::new(),
                    comments: Vec::new(),
                });
            } else if let Some(revision) = current.as_mut() {
                if line.starts_with('#') {
                    revision.comments.push(line.to_owned());
                } else {
                    revision.packages.insert(line.to_owned());
                }
            }
        }
        if let Some(revision) = current.take() {
            revisions.push(revision);
        }

        Ok(ParsedHistory { revisions })
    }

    /// Appends one revision to the history file. The append is a single
    /// write of the fully formatted block.
    pub fn write_revision(
        &self,
        request: &UserRequest,
        removed: &BTreeSet<String>,
        added: &BTreeSet<String>,
    ) -> Result<(), HistoryError> {
        let mut block = String::new();
        block.push_str(&format!("==> {} <==\n", request.date));
        if let Some(cmd) = &request.cmd {
            block.push_str(&format!("# cmd: {cmd}\n"));
        }
        if !request.channels.is_empty() {
            block.push_str(&format!("# channels: {}\n", request.channels.join(", ")));
        }
        if let Some(action) = &request.action {
            let specs = match action.as_str() {
                "remove" | "uninstall" => &request.remove_specs,
                _ => &request.update_specs,
            };
            let formatted: Vec<String> = specs.iter().map(|s| format!("'{s}'")).collect();
            block.push_str(&format!("# {} specs: [{}]\n", action, formatted.join(", ")));
        }
        for removed in removed {
            block.push_str(&format!("-{removed}\n"));
        }
        for added in added {
            block.push_str(&format!("+{added}\n"));
        }

        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(block.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::{History, UserRequest};

    const HISTORY: &str = r"
==> 2023-02-13 12:01:43 <==
# cmd: conda create -n env python
# channels: conda-forge
# create specs: ['python >=3.10']
+conda-forge/linux-64::python-3.11.0-h9a09f29_0
+conda-forge/linux-64::libzlib-1.2.13-h166bdaf_4

==> 2023-02-14 09:10:22 <==
# cmd: conda install numpy
# install specs: ['numpy']
+conda-forge/linux-64::numpy-1.24.2-py311h8e6699e_0

==> 2023-02-15 16:45:01 <==
# cmd: conda remove numpy
# remove specs: ['numpy']
-conda-forge/linux-64::numpy-1.24.2-py311h8e6699e_0
";

    #[test]
    fn parse_revisions() {
        let parsed = History::parse_str(HISTORY).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.revisions[0].packages.len(), 2);
        assert_eq!(
            parsed.latest().unwrap().timestamp,
            "2023-02-15 16:45:01"
        );
    }

    #[test]
    fn user_requests() {
        let parsed = History::parse_str(HISTORY).unwrap();
        let requests = parsed.user_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].action.as_deref(), Some("create"));
        assert_eq!(requests[0].update_specs, vec!["python >=3.10".to_owned()]);
        assert_eq!(requests[0].channels, vec!["conda-forge".to_owned()]);
        assert_eq!(requests[2].remove_specs, vec!["numpy".to_owned()]);
    }

    #[test]
    fn requested_specs_fold() {
        let parsed = History::parse_str(HISTORY).unwrap();
        let specs = parsed.requested_specs().unwrap();
        // numpy was requested and later removed; only python remains.
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name.as_ref().unwrap().as_normalized(), "python");
    }

    #[test]
    fn newest_form_wins() {
        let history = r"
==> 2023-01-01 10:00:00 <==
# cmd: conda install python
# install specs: ['python >=3.8']

==> 2023-01-02 10:00:00 <==
# cmd: conda install python
# install specs: ['python >=3.10']
";
        let parsed = History::parse_str(history).unwrap();
        let specs = parsed.requested_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].to_string(), "python >=3.10");
    }

    #[test]
    fn append_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());

        let request = UserRequest {
            date: "2023-03-01 08:00:00".to_owned(),
            cmd: Some("krait install numpy".to_owned()),
            action: Some("install".to_owned()),
            update_specs: vec!["numpy >=1.24".to_owned()],
            remove_specs: vec![],
            channels: vec!["conda-forge".to_owned()],
        };
        let added: BTreeSet<String> =
            ["conda-forge/linux-64::numpy-1.24.2-py311h8e6699e_0".to_owned()].into();
        history
            .write_revision(&request, &BTreeSet::new(), &added)
            .unwrap();

        let parsed = history.parse().unwrap();
        assert_eq!(parsed.len(), 1);
        let requests = parsed.user_requests();
        assert_eq!(requests[0].cmd.as_deref(), Some("krait install numpy"));
        assert_eq!(requests[0].update_specs, vec!["numpy >=1.24".to_owned()]);
        assert!(parsed.revisions[0]
            .packages
            .iter()
            .any(|p| p.starts_with('+')));
    }
}
