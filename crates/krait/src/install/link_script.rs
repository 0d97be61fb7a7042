//! Running the pre/post link and unlink scripts a package may ship.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::process::Command;

use krait_conda_types::{PackageRecord, Platform};

/// The kinds of link scripts a package can carry. They live inside the
/// linked package as `bin/.<name>-<kind>.sh` on posix platforms and
/// `Scripts\.<name>-<kind>.bat` on windows.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkScriptType {
    /// Runs before the files of a package are removed.
    PreUnlink,
    /// Runs after the files of a package were removed.
    PostUnlink,
    /// Runs after the files of a package were linked.
    PostLink,
}

impl LinkScriptType {
    /// The path of the script for a given package, relative to the prefix.
    pub fn get_path(self, package_record: &PackageRecord, platform: Platform) -> String {
        let name = package_record.name.as_normalized();
        let (dir, suffix) = if platform.is_windows() {
            ("Scripts", "bat")
        } else {
            ("bin", "sh")
        };
        format!("{dir}/.{name}-{self}.{suffix}")
    }
}

impl Display for LinkScriptType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkScriptType::PreUnlink => write!(f, "pre-unlink"),
            LinkScriptType::PostUnlink => write!(f, "post-unlink"),
            LinkScriptType::PostLink => write!(f, "post-link"),
        }
    }
}

/// The result of running one link script.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ScriptResult {
    /// The package does not carry the script.
    NotPresent,
    /// The script ran and exited successfully.
    Success,
    /// The script ran and failed, or could not be started.
    Failed {
        /// The exit code, when the script ran at all.
        code: Option<i32>,
    },
}

/// Runs one link script of a package when it exists. The script receives
/// the conventional `PREFIX`, `PKG_NAME`, `PKG_VERSION` and `PKG_BUILDNUM`
/// environment variables.
pub fn run_link_script(
    script_type: LinkScriptType,
    record: &PackageRecord,
    target_prefix: &Path,
    platform: Platform,
) -> ScriptResult {
    let script_path = target_prefix.join(script_type.get_path(record, platform));
    if !script_path.exists() {
        return ScriptResult::NotPresent;
    }

    let mut env = HashMap::new();
    env.insert("PREFIX", target_prefix.to_string_lossy().into_owned());
    env.insert("PKG_NAME", record.name.as_normalized().to_owned());
    env.insert("PKG_VERSION", record.version.to_string());
    env.insert("PKG_BUILDNUM", record.build_number.to_string());

    let mut command = if platform.is_windows() {
        let mut command = Command::new("cmd");
        command.arg("/c").arg(&script_path);
        command
    } else {
        let mut command = Command::new("bash");
        command.arg(&script_path);
        command
    };
    command.envs(env).current_dir(target_prefix);

    tracing::info!(
        "running {script_type} script for {}",
        record.name.as_normalized()
    );
    match command.output() {
        Ok(output) if output.status.success() => ScriptResult::Success,
        Ok(output) => {
            tracing::warn!(
                "{script_type} script for {} failed with {:?}: {}",
                record.name.as_normalized(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
            ScriptResult::Failed {
                code: output.status.code(),
            }
        }
        Err(e) => {
            tracing::warn!(
                "could not start {script_type} script for {}: {e}",
                record.name.as_normalized()
            );
            ScriptResult::Failed { code: None }
        }
    }
}
