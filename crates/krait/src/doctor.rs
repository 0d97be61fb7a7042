//! Read-only health checks over a prefix, with optional fixers.
//!
//! Checks are registered in a small function pointer table keyed by name.
//! Every check takes `(prefix, verbose)` and reports findings without
//! mutating anything; a fixer takes `(prefix, dry_run, yes)` and returns an
//! integer status. Fixers may only perform operations whose effect could
//! itself be expressed as a transaction or a metadata write.

use std::path::Path;

use krait_conda_types::{PackageRecord, PinnedSpecs, PrefixRecord};
use krait_digest::Sha256;

use crate::env_registry::EnvironmentsRegistry;
use crate::prefix::{PrefixData, PrefixDataError};

/// The outcome of one check.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// The name of the check that produced this report.
    pub check: &'static str,

    /// Human readable findings; empty when the check passed.
    pub findings: Vec<String>,
}

impl CheckReport {
    /// Returns true when the check found nothing wrong.
    pub fn is_healthy(&self) -> bool {
        self.findings.is_empty()
    }
}

/// The signature of a check: read-only over the prefix.
pub type CheckFn = fn(prefix: &Path, verbose: bool) -> Result<CheckReport, PrefixDataError>;

/// The signature of a fixer. Returns 0 on success, non-zero otherwise.
pub type FixerFn = fn(prefix: &Path, dry_run: bool, yes: bool) -> i32;

/// A named diagnostic with an optional fixer.
pub struct DoctorCheck {
    /// The registry name of the check.
    pub name: &'static str,

    /// The check itself.
    pub run: CheckFn,

    /// The fixer, when the finding can be repaired automatically.
    pub fixer: Option<FixerFn>,
}

/// Returns the registry of all known checks.
pub fn all_checks() -> Vec<DoctorCheck> {
    vec![
        DoctorCheck {
            name: "missing-files",
            run: check_missing_files,
            fixer: None,
        },
        DoctorCheck {
            name: "altered-files",
            run: check_altered_files,
            fixer: None,
        },
        DoctorCheck {
            name: "consistency",
            run: check_consistency,
            fixer: None,
        },
        DoctorCheck {
            name: "environment-txt",
            run: check_environment_txt,
            fixer: Some(fix_environment_txt),
        },
        DoctorCheck {
            name: "pinned",
            run: check_pinned,
            fixer: None,
        },
        DoctorCheck {
            name: "file-locking",
            run: check_file_locking,
            fixer: None,
        },
        DoctorCheck {
            name: "requests-ca-bundle",
            run: check_requests_ca_bundle,
            fixer: None,
        },
    ]
}

/// Runs every registered check against a prefix.
pub fn run_all(prefix: &Path, verbose: bool) -> Result<Vec<CheckReport>, PrefixDataError> {
    all_checks()
        .iter()
        .map(|check| (check.run)(prefix, verbose))
        .collect()
}

/// Reports files that a prefix record lists but that are missing on disk.
fn check_missing_files(prefix: &Path, _verbose: bool) -> Result<CheckReport, PrefixDataError> {
    let data = PrefixData::load(prefix)?;
    let mut findings = Vec::new();
    for record in data.records() {
        for file in &record.files {
            if !prefix.join(file).exists() {
                findings.push(format!(
                    "{}: missing file '{}'",
                    record.repodata_record.package_record.name.as_normalized(),
                    file.display()
                ));
            }
        }
    }
    Ok(CheckReport {
        check: "missing-files",
        findings,
    })
}

/// Reports files whose content no longer matches the hash recorded at link
/// time.
fn check_altered_files(prefix: &Path, _verbose: bool) -> Result<CheckReport, PrefixDataError> {
    let data = PrefixData::load(prefix)?;
    let mut findings = Vec::new();
    for record in data.records() {
        for entry in &record.paths_data.paths {
            let Some(expected) = entry.sha256_in_prefix.or(entry.sha256) else {
                continue;
            };
            let path = prefix.join(&entry.relative_path);
            if !path.is_file() {
                continue;
            }
            match krait_digest::compute_file_digest::<Sha256>(&path) {
                Ok(actual) if actual != expected => {
                    findings.push(format!(
                        "{}: '{}' was modified after linking",
                        record.repodata_record.package_record.name.as_normalized(),
                        entry.relative_path.display()
                    ));
                }
                Ok(_) => {}
                Err(e) => findings.push(format!(
                    "could not hash '{}': {e}",
                    entry.relative_path.display()
                )),
            }
        }
    }
    Ok(CheckReport {
        check: "altered-files",
        findings,
    })
}

/// Verifies that the installed records form a consistent environment:
/// every dependency satisfied, no constraint violated.
fn check_consistency(prefix: &Path, _verbose: bool) -> Result<CheckReport, PrefixDataError> {
    let data = PrefixData::load(prefix)?;
    let records: Vec<&PrefixRecord> = data.records().collect();
    let package_records: Vec<&PackageRecord> = records
        .iter()
        .map(|r| &r.repodata_record.package_record)
        .collect();

    let findings = match PackageRecord::validate(&package_records) {
        Ok(()) => Vec::new(),
        Err(error) => vec![error.to_string()],
    };
    Ok(CheckReport {
        check: "consistency",
        findings,
    })
}

/// Checks that the prefix is present in the user-scope environments
/// registry.
fn check_environment_txt(prefix: &Path, _verbose: bool) -> Result<CheckReport, PrefixDataError> {
    let mut findings = Vec::new();
    match EnvironmentsRegistry::default_location().and_then(|registry| registry.list()) {
        Ok(known) => {
            if !known.iter().any(|entry| entry == prefix) {
                findings.push(format!(
                    "prefix '{}' is not listed in environments.txt",
                    prefix.display()
                ));
            }
        }
        Err(e) => findings.push(format!("could not read environments.txt: {e}")),
    }
    Ok(CheckReport {
        check: "environment-txt",
        findings,
    })
}

/// Registers the prefix in the environments registry.
fn fix_environment_txt(prefix: &Path, dry_run: bool, _yes: bool) -> i32 {
    if dry_run {
        return 0;
    }
    match EnvironmentsRegistry::default_location().and_then(|registry| registry.register(prefix))
    {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("failed to register environment: {e}");
            1
        }
    }
}

/// Reports pins that the installed records violate.
fn check_pinned(prefix: &Path, _verbose: bool) -> Result<CheckReport, PrefixDataError> {
    let data = PrefixData::load(prefix)?;
    let mut findings = Vec::new();
    match PinnedSpecs::from_prefix(prefix) {
        Ok(pinned) => {
            for pin in &pinned.specs {
                let Some(name) = pin.name.as_ref() else { continue };
                if let Some(installed) = data.get(name) {
                    use krait_conda_types::Matches;
                    if !pin.matches(&installed.repodata_record.package_record) {
                        findings.push(format!(
                            "installed '{}' violates pin '{pin}'",
                            installed.repodata_record.package_record
                        ));
                    }
                }
            }
        }
        Err(e) => findings.push(format!("could not parse the pinned file: {e}")),
    }
    Ok(CheckReport {
        check: "pinned",
        findings,
    })
}

/// Verifies that advisory file locking works inside the prefix, which the
/// transaction machinery depends on.
fn check_file_locking(prefix: &Path, _verbose: bool) -> Result<CheckReport, PrefixDataError> {
    use fs4::fs_std::FileExt;

    let mut findings = Vec::new();
    let probe_path = prefix.join("conda-meta").join(".krait-lock-probe");
    let probe = (|| -> std::io::Result<()> {
        fs_err::create_dir_all(prefix.join("conda-meta"))?;
        let file = fs_err::File::create(&probe_path)?;
        file.file().lock_exclusive()?;
        file.file().unlock()?;
        Ok(())
    })();
    let _ = fs_err::remove_file(&probe_path);
    if let Err(e) = probe {
        findings.push(format!("file locking does not work in this prefix: {e}"));
    }
    Ok(CheckReport {
        check: "file-locking",
        findings,
    })
}

/// Reports a `REQUESTS_CA_BUNDLE` environment variable that points at a
/// file that does not exist; a stale value breaks every download.
fn check_requests_ca_bundle(_prefix: &Path, _verbose: bool) -> Result<CheckReport, PrefixDataError> {
    let mut findings = Vec::new();
    if let Ok(bundle) = std::env::var("REQUESTS_CA_BUNDLE") {
        if !bundle.is_empty() && !Path::new(&bundle).exists() {
            findings.push(format!(
                "REQUESTS_CA_BUNDLE points at '{bundle}' which does not exist"
            ));
        }
    }
    Ok(CheckReport {
        check: "requests-ca-bundle",
        findings,
    })
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::str::FromStr;

    use krait_conda_types::{
        PackageName, PackageRecord, PathType, PathsEntry, PrefixRecord, RepoDataRecord, Version,
    };

    use super::{all_checks, check_missing_files, check_pinned, run_all};
    use crate::prefix::PrefixData;

    fn installed_record(prefix: &std::path::Path, name: &str, files: &[&str]) -> PrefixRecord {
        let paths: Vec<PathsEntry> = files
            .iter()
            .map(|file| PathsEntry {
                relative_path: PathBuf::from(file),
                path_type: PathType::HardLink,
                no_link: false,
                sha256: None,
                sha256_in_prefix: None,
                size_in_bytes: None,
                file_mode: None,
                prefix_placeholder: None,
            })
            .collect();
        let repodata_record = RepoDataRecord {
            package_record: PackageRecord::new(
                PackageName::new_unchecked(name),
                Version::from_str("1.0").unwrap(),
                "0".to_owned(),
            ),
            file_name: format!("{name}-1.0-0.tar.bz2"),
            url: url::Url::parse(&format!("https://example.com/{name}-1.0-0.tar.bz2")).unwrap(),
            channel: "test".to_owned(),
        };
        let record =
            PrefixRecord::from_repodata_record(repodata_record, None, None, paths, None, None);
        let mut data = PrefixData::load(prefix).unwrap();
        data.insert(record.clone()).unwrap();
        data.commit().unwrap();
        record
    }

    #[test]
    fn registry_contains_spec_checks() {
        let names: Vec<&str> = all_checks().iter().map(|check| check.name).collect();
        for expected in [
            "missing-files",
            "altered-files",
            "consistency",
            "environment-txt",
            "pinned",
            "file-locking",
            "requests-ca-bundle",
        ] {
            assert!(names.contains(&expected), "missing check {expected}");
        }
    }

    #[test]
    fn missing_files_are_reported() {
        let prefix = tempfile::tempdir().unwrap();
        installed_record(prefix.path(), "foo", &["bin/foo"]);

        let report = check_missing_files(prefix.path(), false).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert!(report.findings[0].contains("bin/foo"));

        // Creating the file heals the finding.
        std::fs::create_dir_all(prefix.path().join("bin")).unwrap();
        std::fs::write(prefix.path().join("bin/foo"), b"there").unwrap();
        let report = check_missing_files(prefix.path(), false).unwrap();
        assert!(report.is_healthy());
    }

    #[test]
    fn violated_pins_are_reported() {
        let prefix = tempfile::tempdir().unwrap();
        installed_record(prefix.path(), "python", &[]);
        std::fs::write(
            prefix.path().join("conda-meta/pinned"),
            "python >=2.0\n",
        )
        .unwrap();

        let report = check_pinned(prefix.path(), false).unwrap();
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn run_all_is_read_only() {
        let prefix = tempfile::tempdir().unwrap();
        installed_record(prefix.path(), "foo", &[]);
        let before: Vec<_> = std::fs::read_dir(prefix.path().join("conda-meta"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        run_all(prefix.path(), true).unwrap();

        let after: Vec<_> = std::fs::read_dir(prefix.path().join("conda-meta"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(before, after);
    }
}
