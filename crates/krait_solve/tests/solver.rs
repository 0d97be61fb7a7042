//! End-to-end tests of the solver against a small in-memory index.

use std::path::PathBuf;

use assert_matches::assert_matches;
use krait_conda_types::{
    Channel, ChannelConfig, MatchSpec, PackageName, Platform, PrefixRecord, RepoDataRecord,
};
use krait_index::Index;
use krait_solve::{solve, SolveError, SolverOptions, SolverTask, UpdateModifier};

/// Builds repodata JSON for a list of (name, version, build, build_number,
/// depends, constrains, track_features) tuples.
fn repodata_json(packages: &[PackageDef]) -> String {
    let entries: Vec<String> = packages
        .iter()
        .map(|package| {
            let depends: Vec<String> =
                package.depends.iter().map(|d| format!("\"{d}\"")).collect();
            let constrains: Vec<String> = package
                .constrains
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect();
            let track_features: Vec<String> = package
                .track_features
                .iter()
                .map(|t| format!("\"{t}\""))
                .collect();
            format!(
                r#""{name}-{version}-{build}.tar.bz2": {{
                    "name": "{name}",
                    "version": "{version}",
                    "build": "{build}",
                    "build_number": {build_number},
                    "subdir": "linux-64",
                    "depends": [{depends}],
                    "constrains": [{constrains}],
                    "track_features": [{track_features}]
                }}"#,
                name = package.name,
                version = package.version,
                build = package.build,
                build_number = package.build_number,
                depends = depends.join(","),
                constrains = constrains.join(","),
                track_features = track_features.join(","),
            )
        })
        .collect();
    format!(
        r#"{{"info": {{"subdir": "linux-64"}}, "packages": {{{}}}}}"#,
        entries.join(",")
    )
}

struct PackageDef {
    name: &'static str,
    version: &'static str,
    build: &'static str,
    build_number: u64,
    depends: Vec<&'static str>,
    constrains: Vec<&'static str>,
    track_features: Vec<&'static str>,
}

fn package(name: &'static str, version: &'static str, depends: &[&'static str]) -> PackageDef {
    PackageDef {
        name,
        version,
        build: "0",
        build_number: 0,
        depends: depends.to_vec(),
        constrains: vec![],
        track_features: vec![],
    }
}

fn channel(name: &str) -> Channel {
    Channel::from_str(
        name,
        &ChannelConfig::default_with_root_dir(PathBuf::from("/tmp")),
    )
    .unwrap()
}

fn index_of(packages: &[PackageDef]) -> Index {
    let mut index = Index::new();
    index
        .add_subdir_bytes(
            &channel("conda-forge"),
            Platform::Linux64,
            repodata_json(packages).as_bytes(),
            None,
        )
        .unwrap();
    index
}

fn installed_record(index: &Index, name: &str, version: &str) -> PrefixRecord {
    let record = index
        .query(&PackageName::new_unchecked(name))
        .iter()
        .find(|r| r.package_record.version.to_string() == version)
        .unwrap_or_else(|| panic!("{name}={version} not in index"))
        .clone();
    PrefixRecord::from_repodata_record(record, None, None, vec![], None, None)
}

fn task<'i>(index: &'i Index, specs: &[&str]) -> SolverTask<'i> {
    SolverTask {
        installed: Vec::new(),
        specs: specs.iter().map(|s| MatchSpec::from_str(s).unwrap()).collect(),
        pinned: Vec::new(),
        platform: Platform::Linux64,
        options: SolverOptions::default(),
        cancel: None,
        index,
    }
}

fn names_and_versions(records: &[RepoDataRecord]) -> Vec<(String, String)> {
    records
        .iter()
        .map(|r| {
            (
                r.package_record.name.as_normalized().to_owned(),
                r.package_record.version.to_string(),
            )
        })
        .collect()
}

#[test]
fn install_into_empty_prefix() {
    // Scenario: empty prefix, install a=1.0 which depends on b>=2.
    let index = index_of(&[
        package("a", "1.0", &["b >=2"]),
        package("b", "2.0", &[]),
        package("b", "1.9", &[]),
    ]);

    let result = solve(&task(&index, &["a=1.0"])).unwrap();
    assert_eq!(
        names_and_versions(&result.records),
        vec![
            ("a".to_owned(), "1.0".to_owned()),
            ("b".to_owned(), "2.0".to_owned())
        ]
    );
}

#[test]
fn downgrade_dependency_when_required() {
    // Scenario: prefix has {a 1.0, b 2.0}; a=2.0 requires b<2.
    let index = index_of(&[
        package("a", "1.0", &["b >=2"]),
        package("a", "2.0", &["b <2"]),
        package("b", "2.0", &[]),
        package("b", "1.9", &[]),
    ]);

    let mut task = task(&index, &["a=2.0"]);
    task.installed = vec![
        installed_record(&index, "a", "1.0"),
        installed_record(&index, "b", "2.0"),
    ];

    let result = solve(&task).unwrap();
    assert_eq!(
        names_and_versions(&result.records),
        vec![
            ("a".to_owned(), "2.0".to_owned()),
            ("b".to_owned(), "1.9".to_owned())
        ]
    );
}

#[test]
fn freeze_installed_conflicts() {
    // Same as above, but with freeze_installed the downgrade of b is not
    // allowed and the solve must fail with a conflict pointing at b.
    let index = index_of(&[
        package("a", "1.0", &["b >=2"]),
        package("a", "2.0", &["b <2"]),
        package("b", "2.0", &[]),
        package("b", "1.9", &[]),
    ]);

    let mut task = task(&index, &["a=2.0"]);
    task.installed = vec![
        installed_record(&index, "a", "1.0"),
        installed_record(&index, "b", "2.0"),
    ];
    task.options.freeze_installed = true;

    let error = solve(&task).unwrap_err();
    let SolveError::Unsolvable(conflict) = error else {
        panic!("expected an unsolvable error, got {error}");
    };
    assert!(conflict.to_string().contains('b'));
}

#[test]
fn prefers_newest_version_and_build() {
    let index = index_of(&[
        package("foo", "1.0", &[]),
        package("foo", "2.0", &[]),
        PackageDef {
            build: "1",
            build_number: 1,
            ..package("foo", "2.0", &[])
        },
    ]);

    let result = solve(&task(&index, &["foo"])).unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].package_record.build_number, 1);
    assert_eq!(result.records[0].package_record.version.to_string(), "2.0");
}

#[test]
fn track_features_are_penalized() {
    let index = index_of(&[
        PackageDef {
            track_features: vec!["feature"],
            ..package("foo", "2.0", &[])
        },
        package("foo", "1.0", &[]),
    ]);

    // The newer version carries a track feature, so the older one wins.
    let result = solve(&task(&index, &["foo"])).unwrap();
    assert_eq!(result.records[0].package_record.version.to_string(), "1.0");
}

#[test]
fn keeps_installed_when_possible() {
    let index = index_of(&[
        package("a", "1.0", &["b"]),
        package("b", "1.0", &[]),
        package("b", "2.0", &[]),
    ]);

    let mut task = task(&index, &["a"]);
    task.installed = vec![installed_record(&index, "b", "1.0")];

    // b is not an update target, so the installed 1.0 stays even though 2.0
    // is available.
    let result = solve(&task).unwrap();
    assert_eq!(
        names_and_versions(&result.records),
        vec![
            ("a".to_owned(), "1.0".to_owned()),
            ("b".to_owned(), "1.0".to_owned())
        ]
    );
}

#[test]
fn update_all_moves_everything_forward() {
    let index = index_of(&[
        package("a", "1.0", &["b"]),
        package("b", "1.0", &[]),
        package("b", "2.0", &[]),
    ]);

    let mut task = task(&index, &["a"]);
    task.installed = vec![installed_record(&index, "b", "1.0")];
    task.options.update_modifier = UpdateModifier::UpdateAll;

    let result = solve(&task).unwrap();
    assert_eq!(
        names_and_versions(&result.records),
        vec![
            ("a".to_owned(), "1.0".to_owned()),
            ("b".to_owned(), "2.0".to_owned())
        ]
    );
}

#[test]
fn pinned_spec_is_hard() {
    let index = index_of(&[
        package("python", "3.10.4", &[]),
        package("python", "3.11.0", &[]),
    ]);

    let mut task = task(&index, &["python"]);
    task.pinned = vec![MatchSpec::from_str("python 3.10.*").unwrap()];

    let result = solve(&task).unwrap();
    assert_eq!(
        result.records[0].package_record.version.to_string(),
        "3.10.4"
    );
}

#[test]
fn constrains_only_bind_when_chosen() {
    // foo constrains bar<2, but bar is not part of the solution, so the
    // constraint is a no-op.
    let index = index_of(&[
        PackageDef {
            constrains: vec!["bar <2"],
            ..package("foo", "1.0", &[])
        },
        package("bar", "2.0", &[]),
    ]);

    let result = solve(&task(&index, &["foo"])).unwrap();
    assert_eq!(result.records.len(), 1);

    // When bar is requested as well, the constraint binds and bar 2.0 is
    // rejected.
    let error = solve(&task(&index, &["foo", "bar >=2"])).unwrap_err();
    assert_matches!(error, SolveError::Unsolvable(_));
}

#[test]
fn missing_package_errors() {
    let index = index_of(&[package("foo", "1.0", &[])]);

    assert_matches!(
        solve(&task(&index, &["ghost"])).unwrap_err(),
        SolveError::PackageNotFound(_)
    );
}

#[test]
fn nothing_provides_dependency() {
    let index = index_of(&[package("foo", "1.0", &["ghost >=1"])]);

    let error = solve(&task(&index, &["foo"])).unwrap_err();
    assert_matches!(error, SolveError::NothingProvides { .. });
}

#[test]
fn backtracks_over_missing_dependency() {
    // The newest foo depends on a package nobody provides; the solver must
    // reject that candidate and fall back to the older foo instead of
    // aborting the whole solve.
    let index = index_of(&[
        package("foo", "2.0", &["ghost >=1"]),
        package("foo", "1.0", &[]),
    ]);

    let result = solve(&task(&index, &["foo"])).unwrap();
    assert_eq!(
        names_and_versions(&result.records),
        vec![("foo".to_owned(), "1.0".to_owned())]
    );
}

#[test]
fn unsolvable_reports_chain() {
    // a and b demand incompatible versions of c.
    let index = index_of(&[
        package("a", "1.0", &["c >=2"]),
        package("b", "1.0", &["c <2"]),
        package("c", "1.0", &[]),
        package("c", "2.0", &[]),
    ]);

    let error = solve(&task(&index, &["a", "b"])).unwrap_err();
    let SolveError::Unsolvable(conflict) = error else {
        panic!("expected a conflict");
    };
    let rendered = conflict.to_string();
    assert!(rendered.contains('c'), "conflict should mention c: {rendered}");
    assert!(!conflict.causes.is_empty());
}

#[test]
fn deterministic_output() {
    let defs = [
        package("a", "1.0", &["b", "c"]),
        package("b", "1.0", &["d >=1"]),
        package("c", "1.0", &["d <3"]),
        package("d", "1.0", &[]),
        package("d", "2.0", &[]),
        package("d", "3.0", &[]),
    ];

    let index = index_of(&defs);
    let baseline = names_and_versions(&solve(&task(&index, &["a"])).unwrap().records);
    for _ in 0..10 {
        let index = index_of(&defs);
        let result = names_and_versions(&solve(&task(&index, &["a"])).unwrap().records);
        assert_eq!(result, baseline);
    }
}

#[test]
fn prune_drops_unreachable_installed() {
    let index = index_of(&[
        package("a", "1.0", &[]),
        package("orphan", "1.0", &[]),
    ]);

    let mut task = task(&index, &["a"]);
    task.installed = vec![installed_record(&index, "orphan", "1.0")];
    task.options.prune = true;

    let result = solve(&task).unwrap();
    assert_eq!(
        names_and_versions(&result.records),
        vec![("a".to_owned(), "1.0".to_owned())]
    );
}

#[test]
fn virtual_dependencies_are_ignored() {
    let index = index_of(&[package("foo", "1.0", &["__glibc >=2.17"])]);

    let result = solve(&task(&index, &["foo"])).unwrap();
    assert_eq!(result.records.len(), 1);
}

#[test]
fn strict_channel_priority() {
    let mut index = Index::new();
    index
        .add_subdir_bytes(
            &channel("main"),
            Platform::Linux64,
            repodata_json(&[package("foo", "1.0", &[])]).as_bytes(),
            None,
        )
        .unwrap();
    index
        .add_subdir_bytes(
            &channel("extra"),
            Platform::Linux64,
            repodata_json(&[package("foo", "9.0", &[])]).as_bytes(),
            None,
        )
        .unwrap();

    let mut strict_task = task(&index, &["foo"]);
    strict_task.options.channel_priority = krait_solve::ChannelPriority::Strict;
    let result = solve(&strict_task).unwrap();
    assert_eq!(result.records[0].channel, "main");
    assert_eq!(result.records[0].package_record.version.to_string(), "1.0");

    let mut disabled_task = task(&index, &["foo"]);
    disabled_task.options.channel_priority = krait_solve::ChannelPriority::Disabled;
    let result = solve(&disabled_task).unwrap();
    assert_eq!(result.records[0].package_record.version.to_string(), "9.0");
}

#[test]
fn strict_channel_priority_moves_installed_dependency() {
    // lib is an already-installed dependency coming from the low-priority
    // channel while the high-priority channel offers the same package. It is
    // not an update target, but under strict priority the channel violation
    // dominates the keep-installed preference.
    let mut index = Index::new();
    index
        .add_subdir_bytes(
            &channel("main"),
            Platform::Linux64,
            repodata_json(&[package("app", "1.0", &["lib"]), package("lib", "1.0", &[])])
                .as_bytes(),
            None,
        )
        .unwrap();
    index
        .add_subdir_bytes(
            &channel("extra"),
            Platform::Linux64,
            repodata_json(&[package("lib", "1.0", &[])]).as_bytes(),
            None,
        )
        .unwrap();

    let lib_from_extra = index
        .query(&PackageName::new_unchecked("lib"))
        .iter()
        .find(|record| record.channel == "extra")
        .unwrap()
        .clone();
    let installed = vec![PrefixRecord::from_repodata_record(
        lib_from_extra,
        None,
        None,
        vec![],
        None,
        None,
    )];

    let mut strict_task = task(&index, &["app"]);
    strict_task.installed = installed.clone();
    strict_task.options.channel_priority = krait_solve::ChannelPriority::Strict;
    let result = solve(&strict_task).unwrap();
    let lib = result
        .records
        .iter()
        .find(|record| record.package_record.name.as_normalized() == "lib")
        .unwrap();
    assert_eq!(lib.channel, "main");

    // Under flexible priority the installed record wins: no channel penalty
    // outranks the no-change preference.
    let mut flexible_task = task(&index, &["app"]);
    flexible_task.installed = installed;
    let result = solve(&flexible_task).unwrap();
    let lib = result
        .records
        .iter()
        .find(|record| record.package_record.name.as_normalized() == "lib")
        .unwrap();
    assert_eq!(lib.channel, "extra");
}
