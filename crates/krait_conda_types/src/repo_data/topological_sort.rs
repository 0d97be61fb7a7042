use std::collections::{BTreeMap, BTreeSet};

use crate::PackageRecord;

/// Sorts the packages topologically: every package appears after the
/// packages it depends on.
///
/// This function is deterministic: it returns the same result regardless of
/// the input order of `packages` and of the `depends` vectors inside the
/// records. Ties are broken by package name.
///
/// Cycles are tolerated by breaking the edge back into the cycle at the
/// alphabetically smallest member, so the function always returns all
/// packages. Note that this function only works for packages with unique
/// names.
pub fn sort_topologically<T: AsRef<PackageRecord> + Clone>(packages: Vec<T>) -> Vec<T> {
    let by_name: BTreeMap<&str, &T> = packages
        .iter()
        .map(|p| (p.as_ref().name.as_normalized(), p))
        .collect();

    // Dependency edges restricted to packages in the input set.
    let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (&name, package) in &by_name {
        let deps = package
            .as_ref()
            .depends
            .iter()
            .map(|spec| package_name_from_match_spec(spec))
            .filter(|dep| *dep != name)
            .filter_map(|dep| by_name.get_key_value(dep).map(|(&dep, _)| dep))
            .collect();
        dependencies.insert(name, deps);
    }

    let mut sorted = Vec::with_capacity(packages.len());
    let mut installed: BTreeSet<&str> = BTreeSet::new();

    while sorted.len() < packages.len() {
        // Take every package whose dependencies are already placed. The
        // iteration order over the BTreeMap makes this deterministic.
        let installable: Vec<&str> = dependencies
            .iter()
            .filter(|(name, deps)| {
                !installed.contains(*name) && deps.iter().all(|dep| installed.contains(dep))
            })
            .map(|(&name, _)| name)
            .collect();

        if installable.is_empty() {
            // A cycle: break it at the alphabetically smallest remaining
            // package with the fewest unplaced dependencies.
            let fallback = dependencies
                .iter()
                .filter(|(name, _)| !installed.contains(*name))
                .min_by_key(|(name, deps)| {
                    (
                        deps.iter().filter(|dep| !installed.contains(*dep)).count(),
                        **name,
                    )
                })
                .map(|(&name, _)| name)
                .expect("there must be at least one remaining package");
            installed.insert(fallback);
            sorted.push((*by_name[fallback]).clone());
            continue;
        }

        for name in installable {
            installed.insert(name);
            sorted.push((*by_name[name]).clone());
        }
    }

    sorted
}

/// Extracts the package name from a match spec string: everything up to the
/// first space, comparison operator or bracket.
pub(crate) fn package_name_from_match_spec(spec: &str) -> &str {
    spec.split(|c: char| c.is_whitespace() || "=<>!~[".contains(c))
        .next()
        .unwrap_or(spec)
}
