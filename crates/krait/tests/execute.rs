//! End-to-end tests: build small package archives, draw them through the
//! cache and execute transactions against a scratch prefix.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use krait_cache::PackageCache;
use krait_conda_types::{
    PackageName, PackageRecord, Platform, PrefixRecord, RepoDataRecord, Version,
};
use krait::install::{execute_transaction, InstallOptions, LinkError};
use krait::{PrefixData, Transaction};
use url::Url;

const PLACEHOLDER: &str = "/opt/anaconda1anaconda2anaconda3";

struct FileSpec {
    path: &'static str,
    contents: Vec<u8>,
    has_prefix: bool,
    executable: bool,
}

fn text_file(path: &'static str, contents: &str) -> FileSpec {
    FileSpec {
        path,
        contents: contents.as_bytes().to_vec(),
        has_prefix: false,
        executable: false,
    }
}

fn prefix_file(path: &'static str, contents: &str) -> FileSpec {
    FileSpec {
        path,
        contents: contents.as_bytes().to_vec(),
        has_prefix: true,
        executable: false,
    }
}

fn script_file(path: &'static str, contents: &str) -> FileSpec {
    FileSpec {
        path,
        contents: contents.as_bytes().to_vec(),
        has_prefix: false,
        executable: true,
    }
}

/// Builds a `.tar.bz2` package archive with an `info/` directory and the
/// given payload files.
fn build_package(dir: &Path, name: &str, version: &str, files: &[FileSpec]) -> RepoDataRecord {
    let file_name = format!("{name}-{version}-0.tar.bz2");
    let archive_path = dir.join(&file_name);
    let file = std::fs::File::create(&archive_path).unwrap();
    let encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut append = |path: &str, contents: &[u8], mode: u32| {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, path, contents).unwrap();
    };

    let index_json = format!(
        r#"{{"name": "{name}", "version": "{version}", "build": "0", "build_number": 0, "subdir": "linux-64"}}"#
    );
    append("info/index.json", index_json.as_bytes(), 0o644);

    let paths_entries: Vec<String> = files
        .iter()
        .map(|file| {
            let sha256 = krait_digest::compute_bytes_digest::<krait_digest::Sha256>(&file.contents);
            if file.has_prefix {
                format!(
                    r#"{{"_path": "{}", "path_type": "hardlink", "file_mode": "text",
                        "prefix_placeholder": "{PLACEHOLDER}",
                        "sha256": "{sha256:x}", "size_in_bytes": {}}}"#,
                    file.path,
                    file.contents.len()
                )
            } else {
                format!(
                    r#"{{"_path": "{}", "path_type": "hardlink",
                        "sha256": "{sha256:x}", "size_in_bytes": {}}}"#,
                    file.path,
                    file.contents.len()
                )
            }
        })
        .collect();
    let paths_json = format!(
        r#"{{"paths_version": 1, "paths": [{}]}}"#,
        paths_entries.join(",")
    );
    append("info/paths.json", paths_json.as_bytes(), 0o644);

    for file in files {
        let mode = if file.executable { 0o755 } else { 0o644 };
        append(file.path, &file.contents, mode);
    }

    use std::io::Write;
    builder
        .into_inner()
        .unwrap()
        .finish()
        .unwrap()
        .flush()
        .unwrap();

    let bytes = std::fs::read(&archive_path).unwrap();
    let mut package_record = PackageRecord::new(
        PackageName::new_unchecked(name),
        Version::from_str(version).unwrap(),
        "0".to_owned(),
    );
    package_record.subdir = "linux-64".to_owned();
    package_record.sha256 = Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(
        &bytes,
    ));
    RepoDataRecord {
        package_record,
        url: Url::from_file_path(&archive_path).unwrap(),
        channel: "local".to_owned(),
        file_name,
    }
}

/// A fetch provider that reads `file://` urls from disk.
fn file_provider(
    url: &Url,
) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(std::fs::read(url.to_file_path().expect("file url"))?)
}

fn run_transaction(
    current: Vec<PrefixRecord>,
    desired: Vec<RepoDataRecord>,
    prefix: &Path,
    cache: &PackageCache,
    options: &InstallOptions,
) -> Result<Transaction, LinkError> {
    let transaction =
        Transaction::from_current_and_desired(current, desired, false, Platform::Linux64).unwrap();
    let mut prefix_data = PrefixData::load(prefix).unwrap();
    execute_transaction(&transaction, &mut prefix_data, cache, &file_provider, options)?;
    Ok(transaction)
}

/// Installing two fresh packages creates their files, their prefix records
/// and (with a request attached) one history revision.
#[test]
fn install_into_empty_prefix() {
    let workdir = tempfile::tempdir().unwrap();
    let prefix = workdir.path().join("env");
    std::fs::create_dir_all(&prefix).unwrap();
    let cache = PackageCache::new(workdir.path().join("cache")).unwrap();

    let b = build_package(
        workdir.path(),
        "b",
        "2.0",
        &[text_file("lib/libb.so", "b library")],
    );
    let mut a = build_package(
        workdir.path(),
        "a",
        "1.0",
        &[text_file("bin/a", "the a tool")],
    );
    a.package_record.depends = vec!["b >=2".to_owned()];

    let options = InstallOptions {
        history_request: Some(krait_conda_types::UserRequest {
            date: "2024-05-01 12:00:00".to_owned(),
            cmd: Some("krait install a".to_owned()),
            action: Some("install".to_owned()),
            update_specs: vec!["a=1.0".to_owned()],
            remove_specs: vec![],
            channels: vec!["local".to_owned()],
        }),
        ..InstallOptions::default()
    };
    run_transaction(vec![], vec![a, b], &prefix, &cache, &options).unwrap();

    assert!(prefix.join("bin/a").is_file());
    assert!(prefix.join("lib/libb.so").is_file());

    // Two prefix records and one history revision.
    let data = PrefixData::load(&prefix).unwrap();
    assert_eq!(data.len(), 2);
    let history = krait_conda_types::History::new(&prefix).parse().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.revisions[0].packages.len(), 2);

    // Property: the union of recorded files matches the files on disk
    // (minus conda-meta).
    let mut recorded: Vec<PathBuf> = data
        .records()
        .flat_map(|record| record.files.iter().cloned())
        .collect();
    recorded.sort();
    let mut on_disk = Vec::new();
    for entry in walk(&prefix) {
        let relative = entry.strip_prefix(&prefix).unwrap().to_path_buf();
        if !relative.starts_with("conda-meta") {
            on_disk.push(relative);
        }
    }
    on_disk.sort();
    assert_eq!(recorded, on_disk);
}

/// Text placeholders are rewritten to the target prefix on link.
#[test]
fn text_placeholder_rewrite() {
    let workdir = tempfile::tempdir().unwrap();
    let prefix = workdir.path().join("env");
    std::fs::create_dir_all(&prefix).unwrap();
    let cache = PackageCache::new(workdir.path().join("cache")).unwrap();

    let package = build_package(
        workdir.path(),
        "tool",
        "1.0",
        &[prefix_file(
            "etc/profile.d/tool.sh",
            &format!("echo {PLACEHOLDER}/bin"),
        )],
    );

    run_transaction(
        vec![],
        vec![package],
        &prefix,
        &cache,
        &InstallOptions::default(),
    )
    .unwrap();

    let contents = std::fs::read_to_string(prefix.join("etc/profile.d/tool.sh")).unwrap();
    assert_eq!(contents, format!("echo {}/bin", prefix.display()));

    // The prefix record remembers the placeholder that was replaced.
    let data = PrefixData::load(&prefix).unwrap();
    let record = data.get(&PackageName::new_unchecked("tool")).unwrap();
    assert_eq!(
        record.paths_data.paths[0].prefix_placeholder.as_deref(),
        Some(PLACEHOLDER)
    );
}

/// A failing post-link script rolls the package back completely: no files,
/// no prefix record, no history entry.
#[cfg(unix)]
#[test]
fn post_link_failure_rolls_back() {
    let workdir = tempfile::tempdir().unwrap();
    let prefix = workdir.path().join("env");
    std::fs::create_dir_all(&prefix).unwrap();
    let cache = PackageCache::new(workdir.path().join("cache")).unwrap();

    let package = build_package(
        workdir.path(),
        "x",
        "1.0",
        &[
            text_file("share/x/data.txt", "payload"),
            script_file("bin/.x-post-link.sh", "exit 1\n"),
        ],
    );

    let options = InstallOptions {
        execute_link_scripts: true,
        history_request: Some(krait_conda_types::UserRequest {
            date: "2024-05-01 12:00:00".to_owned(),
            cmd: Some("krait install x".to_owned()),
            action: Some("install".to_owned()),
            update_specs: vec!["x".to_owned()],
            remove_specs: vec![],
            channels: vec![],
        }),
        ..InstallOptions::default()
    };

    let error = run_transaction(vec![], vec![package], &prefix, &cache, &options).unwrap_err();
    assert!(matches!(error, LinkError::PostLinkScriptFailed { .. }));

    // Nothing of x remains.
    assert!(!prefix.join("share/x/data.txt").exists());
    let data = PrefixData::load(&prefix).unwrap();
    assert!(data.get(&PackageName::new_unchecked("x")).is_none());
    let history = krait_conda_types::History::new(&prefix).parse().unwrap();
    assert!(history.is_empty());
}

/// Removing a package leaves the prefix as it was before it was installed.
#[test]
fn install_then_remove_restores_prefix() {
    let workdir = tempfile::tempdir().unwrap();
    let prefix = workdir.path().join("env");
    std::fs::create_dir_all(&prefix).unwrap();
    let cache = PackageCache::new(workdir.path().join("cache")).unwrap();

    let package = build_package(
        workdir.path(),
        "transient",
        "1.0",
        &[text_file("share/transient/data.txt", "payload")],
    );

    run_transaction(
        vec![],
        vec![package],
        &prefix,
        &cache,
        &InstallOptions::default(),
    )
    .unwrap();
    let installed = PrefixData::load(&prefix).unwrap();
    assert_eq!(installed.len(), 1);
    let current: Vec<PrefixRecord> = installed.records().cloned().collect();

    run_transaction(current, vec![], &prefix, &cache, &InstallOptions::default()).unwrap();

    assert!(!prefix.join("share").exists());
    assert!(PrefixData::load(&prefix).unwrap().is_empty());
}

/// A changed package is unlinked before the new version is linked.
#[test]
fn upgrade_replaces_files() {
    let workdir = tempfile::tempdir().unwrap();
    let prefix = workdir.path().join("env");
    std::fs::create_dir_all(&prefix).unwrap();
    let cache = PackageCache::new(workdir.path().join("cache")).unwrap();

    let v1 = build_package(
        workdir.path(),
        "app",
        "1.0",
        &[text_file("bin/app", "version one"), text_file("share/app/v1-only", "old")],
    );
    let v2 = build_package(
        workdir.path(),
        "app",
        "2.0",
        &[text_file("bin/app", "version two")],
    );

    run_transaction(vec![], vec![v1], &prefix, &cache, &InstallOptions::default()).unwrap();
    let current: Vec<PrefixRecord> = PrefixData::load(&prefix)
        .unwrap()
        .records()
        .cloned()
        .collect();
    run_transaction(current, vec![v2], &prefix, &cache, &InstallOptions::default()).unwrap();

    assert_eq!(
        std::fs::read_to_string(prefix.join("bin/app")).unwrap(),
        "version two"
    );
    assert!(!prefix.join("share/app/v1-only").exists());
    let data = PrefixData::load(&prefix).unwrap();
    assert_eq!(
        data.get(&PackageName::new_unchecked("app"))
            .unwrap()
            .repodata_record
            .package_record
            .version
            .to_string(),
        "2.0"
    );
}

/// Recursively collects all files below a directory.
fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}
