//! Executing a [`Transaction`] against a prefix.
//!
//! The engine works through the phases in a fixed order: verify, pre-unlink
//! scripts, unlink, link, record, post-link scripts, history. Verification
//! failures abort before anything is mutated. A fatal failure while linking
//! rolls back every completed link step of the transaction in reverse
//! order; failures during the rollback itself are reported alongside the
//! original error, never instead of it.

pub mod link;
pub mod link_script;
pub mod python;
pub mod unlink;

mod entry_point;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use krait_cache::{CacheError, FetchProvider, PackageCache};
use krait_conda_types::package::{
    IndexJson, LinkJson, NoArchLinks, PackageFile, PathsJson,
};
use krait_conda_types::{
    history::{History, UserRequest},
    Link, LinkType, MatchSpec, Matches, PathsEntry, PrefixRecord, RepoDataRecord,
};
use rayon::prelude::*;

pub use entry_point::{
    create_unix_python_entry_point, create_windows_python_entry_point,
    python_entry_point_template,
};
pub use link::{link_file, LinkFileError, LinkedFile};
pub use link_script::{run_link_script, LinkScriptType, ScriptResult};
pub use python::{PythonInfo, PythonInfoError};
pub use unlink::{empty_trash, unlink_package, UnlinkError};

use crate::prefix::{PrefixData, PrefixDataError, PrefixGuard};
use crate::transaction::Transaction;

/// An error that can occur while executing a transaction.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The operation was cancelled; the in-flight package was rolled back.
    #[error("the transaction was cancelled")]
    Cancelled,

    /// Pre-mutation verification failed; nothing was changed.
    #[error("transaction verification failed: {0}")]
    VerificationFailed(String),

    /// Interaction with the package cache failed.
    #[error(transparent)]
    CacheError(#[from] CacheError),

    /// Reading or writing prefix metadata failed.
    #[error(transparent)]
    PrefixError(#[from] PrefixDataError),

    /// A metadata file of an extracted package could not be read.
    #[error("failed to read '{file}' of package '{package}'")]
    InvalidPackage {
        /// The package whose metadata is broken.
        package: String,
        /// The metadata file at fault.
        file: &'static str,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A file could not be linked into the prefix.
    #[error("failed to link '{file}' of package '{package}'")]
    LinkFailed {
        /// The package being linked.
        package: String,
        /// The file that failed.
        file: PathBuf,
        /// The underlying error.
        #[source]
        source: LinkFileError,
    },

    /// A package could not be unlinked.
    #[error(transparent)]
    UnlinkFailed(#[from] UnlinkError),

    /// A post-link script exited with a non-zero status. The package was
    /// rolled back.
    #[error("the post-link script of '{package}' failed")]
    PostLinkScriptFailed {
        /// The package whose script failed.
        package: String,
    },

    /// An IO error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// A noarch python package is part of the target but the target
    /// contains no python.
    #[error("the target state contains noarch python packages but no python")]
    MissingPythonInfo,

    /// A fatal error occurred and the rollback of already linked packages
    /// did not fully succeed. The affected packages are in an indeterminate
    /// state; re-running with `force_reinstall` repairs them.
    #[error("transaction failed ({original}); rollback left {} package(s) in an indeterminate state", .not_rolled_back.len())]
    PartialTransaction {
        /// The error that caused the rollback.
        #[source]
        original: Box<LinkError>,
        /// The packages whose rollback failed.
        not_rolled_back: Vec<String>,
    },
}

/// Options that modify how a transaction is executed.
#[derive(Default)]
pub struct InstallOptions {
    /// Whether symlinks may be used. `None` probes the filesystem.
    pub allow_symbolic_links: Option<bool>,

    /// Whether hard links may be used. `None` probes the filesystem.
    pub allow_hard_links: Option<bool>,

    /// The prefix path to write into rewritten placeholder files. Defaults
    /// to the target prefix itself.
    pub target_prefix: Option<PathBuf>,

    /// Whether pre/post link scripts are executed.
    pub execute_link_scripts: bool,

    /// The specs the user requested, used to stamp `requested_spec` into
    /// the prefix records of directly requested packages.
    pub requested_specs: Vec<MatchSpec>,

    /// When set, a history revision is appended after a successful
    /// transaction.
    pub history_request: Option<UserRequest>,

    /// Cooperative cancellation token, checked between packages.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl InstallOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }
}

/// Executes a transaction against the prefix of `prefix_data`.
///
/// The prefix lock is held for the whole execution; concurrent transactions
/// against the same prefix serialise on it. The shared cache lock is held
/// while linking so the cache cannot reap directories in use.
#[tracing::instrument(skip_all, fields(prefix = %prefix_data.prefix().display()))]
pub fn execute_transaction(
    transaction: &Transaction,
    prefix_data: &mut PrefixData,
    cache: &PackageCache,
    provider: &dyn FetchProvider,
    options: &InstallOptions,
) -> Result<(), LinkError> {
    let prefix = prefix_data.prefix().to_path_buf();
    let _prefix_guard = PrefixGuard::lock(&prefix)?;

    let records_to_link = transaction.records_to_link();
    let records_to_unlink = transaction.records_to_unlink();

    // ----- Phase 1: verify, strictly before any mutation. -----------------

    // Extraction takes the exclusive cache lock internally, so the shared
    // linking lock is acquired only afterwards.
    let mut package_dirs: Vec<PathBuf> = Vec::with_capacity(records_to_link.len());
    for record in &records_to_link {
        package_dirs.push(cache.get_or_extract(record, provider)?);
    }
    let _cache_guard = cache.lock_shared()?;

    if records_to_link
        .iter()
        .any(|record| record.package_record.noarch.is_python())
        && transaction.python_info.is_none()
    {
        return Err(LinkError::MissingPythonInfo);
    }

    for record in &records_to_unlink {
        verify_unlinkable(&prefix, record)?;
    }

    // ----- Phase 2 + 3: pre-unlink scripts, then unlink. -------------------

    if options.execute_link_scripts {
        for record in &records_to_unlink {
            // Script failures before/after unlink are logged, never fatal.
            run_link_script(
                LinkScriptType::PreUnlink,
                &record.repodata_record.package_record,
                &prefix,
                transaction.platform,
            );
        }
    }

    for record in &records_to_unlink {
        unlink_package(&prefix, record)?;
        prefix_data.remove(&record.repodata_record.package_record.name);
        if options.execute_link_scripts {
            run_link_script(
                LinkScriptType::PostUnlink,
                &record.repodata_record.package_record,
                &prefix,
                transaction.platform,
            );
        }
    }

    // ----- Phase 4 - 6: link, record, post-link scripts. -------------------

    let mut completed: Vec<PrefixRecord> = Vec::new();
    for (record, package_dir) in records_to_link.iter().zip(&package_dirs) {
        if options.is_cancelled() {
            return rollback(&prefix, prefix_data, completed, LinkError::Cancelled);
        }

        let linked = match link_single_package(
            record,
            package_dir,
            &prefix,
            transaction,
            options,
        ) {
            Ok(linked) => linked,
            Err(error) => return rollback(&prefix, prefix_data, completed, error),
        };

        // Phase 5: commit the prefix record (write-to-temp + rename).
        let requested_spec = options
            .requested_specs
            .iter()
            .find(|spec| spec.matches(*record))
            .map(ToString::to_string);
        let prefix_record = PrefixRecord::from_repodata_record(
            (*record).clone(),
            Some(cache.archive_path(record)),
            Some(package_dir.clone()),
            linked,
            requested_spec,
            Some(Link {
                source: package_dir.clone(),
                link_type: Some(LinkType::HardLink),
            }),
        );
        let conda_meta = prefix.join("conda-meta");
        if let Err(e) = fs_err::create_dir_all(&conda_meta) {
            return rollback(&prefix, prefix_data, completed, e.into());
        }
        if let Err(e) =
            prefix_record.write_to_path(conda_meta.join(prefix_record.file_name()), true)
        {
            return rollback(&prefix, prefix_data, completed, e.into());
        }
        if let Err(e) = prefix_data.insert(prefix_record.clone()) {
            return rollback(&prefix, prefix_data, completed, e.into());
        }

        // Phase 6: the post-link script; a failure is fatal and rolls the
        // package (and the transaction) back.
        if options.execute_link_scripts {
            let result = run_link_script(
                LinkScriptType::PostLink,
                &record.package_record,
                &prefix,
                transaction.platform,
            );
            if matches!(result, ScriptResult::Failed { .. }) {
                let package = record.package_record.name.as_normalized().to_owned();
                completed.push(prefix_record);
                return rollback(
                    &prefix,
                    prefix_data,
                    completed,
                    LinkError::PostLinkScriptFailed { package },
                );
            }
        }

        completed.push(prefix_record);
    }

    // Best effort: drop trash left behind by busy files of earlier unlinks.
    if let Err(e) = empty_trash(&prefix) {
        tracing::warn!("could not empty the trash of {}: {e}", prefix.display());
    }

    // ----- Phase 7: the history ledger. ------------------------------------

    if let Some(request) = &options.history_request {
        let removed: BTreeSet<String> = records_to_unlink
            .iter()
            .map(|record| dist_string(&record.repodata_record))
            .collect();
        let added: BTreeSet<String> = records_to_link
            .iter()
            .map(|record| dist_string(record))
            .collect();
        History::new(&prefix)
            .write_revision(request, &removed, &added)
            .map_err(|e| {
                LinkError::VerificationFailed(format!("failed to append history: {e}"))
            })?;
    }

    Ok(())
}

/// The distribution string recorded in the history ledger.
fn dist_string(record: &RepoDataRecord) -> String {
    let package = &record.package_record;
    format!(
        "{}/{}::{}-{}-{}",
        record.channel,
        package.subdir,
        package.name.as_normalized(),
        package.version,
        package.build
    )
}

/// Verifies that the recorded file list of a package can be unlinked: the
/// paths must stay inside the prefix and may not point at directories that
/// the record does not own.
fn verify_unlinkable(prefix: &Path, record: &PrefixRecord) -> Result<(), LinkError> {
    for file in &record.files {
        if file.is_absolute() {
            return Err(LinkError::VerificationFailed(format!(
                "record '{}' lists the absolute path '{}'",
                record.file_name(),
                file.display()
            )));
        }
        let on_disk = prefix.join(file);
        if on_disk.is_dir() {
            return Err(LinkError::VerificationFailed(format!(
                "record '{}' lists '{}' as a file but a directory is on disk",
                record.file_name(),
                file.display()
            )));
        }
        if !on_disk.exists() {
            // A missing file is tolerated so an interrupted unlink can be
            // repeated.
            tracing::debug!(
                "file '{}' of '{}' is already missing",
                file.display(),
                record.file_name()
            );
        }
    }
    Ok(())
}

/// Links all files of one package and generates its entry points. On
/// failure the files linked so far are removed again before returning.
fn link_single_package(
    record: &RepoDataRecord,
    package_dir: &Path,
    prefix: &Path,
    transaction: &Transaction,
    options: &InstallOptions,
) -> Result<Vec<PathsEntry>, LinkError> {
    let package = record.package_record.name.as_normalized().to_owned();
    let invalid = |file: &'static str| {
        let package = package.clone();
        move |source| LinkError::InvalidPackage {
            package,
            file,
            source,
        }
    };

    let paths_json = PathsJson::from_package_directory_with_deprecated_fallback(package_dir)
        .map_err(invalid("paths.json"))?;
    let index_json =
        IndexJson::from_package_directory(package_dir).map_err(invalid("index.json"))?;
    let is_noarch_python = index_json.noarch.is_python();

    let link_json = if is_noarch_python {
        match LinkJson::from_package_directory(package_dir) {
            Ok(link_json) => Some(link_json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(invalid("link.json")(e)),
        }
    } else {
        None
    };

    let target_prefix = options
        .target_prefix
        .clone()
        .unwrap_or_else(|| prefix.to_path_buf())
        .to_string_lossy()
        .into_owned();
    let allow_symlinks = options.allow_symbolic_links.unwrap_or(cfg!(unix));
    let allow_hard_links = options.allow_hard_links.unwrap_or(true);
    let python_info = transaction.python_info.as_ref();

    // Link the files in parallel; the indexed collect keeps the order of
    // the paths.json entries.
    let results: Vec<Result<PathsEntry, LinkError>> = paths_json
        .paths
        .par_iter()
        .map(|entry| {
            link::link_file(
                entry,
                package_dir,
                prefix,
                &target_prefix,
                is_noarch_python,
                python_info,
                allow_symlinks,
                allow_hard_links,
                transaction.platform,
            )
            .map(|linked| link::paths_entry_for(entry, &linked))
            .map_err(|source| LinkError::LinkFailed {
                package: package.clone(),
                file: entry.relative_path.clone(),
                source,
            })
        })
        .collect();

    let mut entries = Vec::with_capacity(results.len());
    let mut failure = None;
    for result in results {
        match result {
            Ok(entry) => entries.push(entry),
            Err(error) if failure.is_none() => failure = Some(error),
            Err(_) => {}
        }
    }

    if let Some(error) = failure {
        // Per-package rollback: remove everything this package already
        // placed into the prefix.
        for entry in &entries {
            let _ = fs_err::remove_file(prefix.join(&entry.relative_path));
        }
        return Err(error);
    }

    // Entry points of noarch python packages.
    if let Some(link_json) = link_json {
        let NoArchLinks::Python(links) = link_json.noarch else {
            return Ok(entries);
        };
        let python_info = python_info.ok_or(LinkError::MissingPythonInfo)?;
        for entry_point in &links.entry_points {
            if transaction.platform.is_windows() {
                let created = create_windows_python_entry_point(
                    prefix,
                    &target_prefix,
                    entry_point,
                    python_info,
                )?;
                entries.extend(created);
            } else {
                entries.push(create_unix_python_entry_point(
                    prefix,
                    &target_prefix,
                    entry_point,
                    python_info,
                )?);
            }
        }
    }

    Ok(entries)
}

/// Rolls back every completed link step in reverse order and returns the
/// original error. When the rollback itself fails for some packages the
/// error is upgraded to [`LinkError::PartialTransaction`] naming them.
fn rollback(
    prefix: &Path,
    prefix_data: &mut PrefixData,
    completed: Vec<PrefixRecord>,
    original: LinkError,
) -> Result<(), LinkError> {
    tracing::warn!("rolling back transaction after error: {original}");

    let mut not_rolled_back = Vec::new();
    for record in completed.into_iter().rev() {
        let name = record.repodata_record.package_record.name.clone();
        match unlink_package(prefix, &record) {
            Ok(()) => {
                prefix_data.remove(&name);
            }
            Err(e) => {
                tracing::error!(
                    "rollback of '{}' failed: {e}",
                    name.as_normalized()
                );
                not_rolled_back.push(name.as_normalized().to_owned());
            }
        }
    }

    if not_rolled_back.is_empty() {
        Err(original)
    } else {
        Err(LinkError::PartialTransaction {
            original: Box::new(original),
            not_rolled_back,
        })
    }
}
