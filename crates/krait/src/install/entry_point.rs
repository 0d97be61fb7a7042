//! Generating python entry point scripts for `noarch: python` packages.

use std::io::Write;
use std::path::Path;

use krait_conda_types::package::EntryPoint;
use krait_conda_types::{PathType, PathsEntry};

use super::python::PythonInfo;

/// The body of a generated python entry point script.
pub fn python_entry_point_template(
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> String {
    let python_path = Path::new(target_prefix).join(&python_info.path);
    format!(
        "#!{python}\n\
         # -*- coding: utf-8 -*-\n\
         import re\n\
         import sys\n\n\
         from {module} import {func}\n\n\
         if __name__ == '__main__':\n\
         \x20   sys.argv[0] = re.sub(r'(-script\\.pyw?|\\.exe)?$', '', sys.argv[0])\n\
         \x20   sys.exit({func}())\n",
        python = python_path.display(),
        module = entry_point.module,
        func = entry_point.function,
    )
}

/// Creates an entry point script on unix: a single executable python file
/// in the `bin` directory.
pub fn create_unix_python_entry_point(
    target_dir: &Path,
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> Result<PathsEntry, std::io::Error> {
    let relative_path = python_info.bin_dir.join(&entry_point.command);
    let script = python_entry_point_template(target_prefix, entry_point, python_info);
    let destination = target_dir.join(&relative_path);
    if let Some(parent) = destination.parent() {
        fs_err::create_dir_all(parent)?;
    }

    let mut file = fs_err::File::create(&destination)?;
    file.write_all(script.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs_err::set_permissions(&destination, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(PathsEntry {
        relative_path,
        path_type: PathType::UnixPythonEntryPoint,
        no_link: false,
        sha256: None,
        sha256_in_prefix: Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(
            script.as_bytes(),
        )),
        size_in_bytes: Some(script.len() as u64),
        file_mode: None,
        prefix_placeholder: None,
    })
}

/// Creates an entry point on windows: a `<command>-script.py` file plus a
/// `.bat` shim that invokes it with the environment's python.
pub fn create_windows_python_entry_point(
    target_dir: &Path,
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> Result<[PathsEntry; 2], std::io::Error> {
    let script_path = python_info
        .bin_dir
        .join(format!("{}-script.py", entry_point.command));
    let script = python_entry_point_template(target_prefix, entry_point, python_info);
    let script_destination = target_dir.join(&script_path);
    if let Some(parent) = script_destination.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(&script_destination, script.as_bytes())?;

    let shim_path = python_info
        .bin_dir
        .join(format!("{}.bat", entry_point.command));
    let shim = format!(
        "@echo off\r\n\"%~dp0..\\python.exe\" \"%~dp0{}-script.py\" %*\r\n",
        entry_point.command
    );
    fs_err::write(target_dir.join(&shim_path), shim.as_bytes())?;

    Ok([
        PathsEntry {
            relative_path: script_path,
            path_type: PathType::WindowsPythonEntryPointScript,
            no_link: false,
            sha256: None,
            sha256_in_prefix: Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(
                script.as_bytes(),
            )),
            size_in_bytes: Some(script.len() as u64),
            file_mode: None,
            prefix_placeholder: None,
        },
        PathsEntry {
            relative_path: shim_path,
            path_type: PathType::WindowsPythonEntryPointScript,
            no_link: false,
            sha256: None,
            sha256_in_prefix: Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(
                shim.as_bytes(),
            )),
            size_in_bytes: Some(shim.len() as u64),
            file_mode: None,
            prefix_placeholder: None,
        },
    ])
}
