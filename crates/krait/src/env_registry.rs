//! The user-scope registry of known environments: a plain text file with
//! one absolute prefix per line, used to enumerate environments.

use std::io::Write;
use std::path::{Path, PathBuf};

/// The registry file, `~/.conda/environments.txt` by convention.
pub struct EnvironmentsRegistry {
    path: PathBuf,
}

impl EnvironmentsRegistry {
    /// Opens the registry at its default user-scope location. Fails when no
    /// home directory can be determined.
    pub fn default_location() -> std::io::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine the home directory",
            )
        })?;
        Ok(Self {
            path: home.join(".conda").join("environments.txt"),
        })
    }

    /// Opens a registry at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists the registered prefixes. A missing registry file is an empty
    /// registry.
    pub fn list(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs_err::read_to_string(&self.path)?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Adds a prefix to the registry. Registering an already known prefix
    /// is a no-op.
    pub fn register(&self, prefix: &Path) -> std::io::Result<()> {
        let mut known = self.list()?;
        if known.iter().any(|entry| entry == prefix) {
            return Ok(());
        }
        known.push(prefix.to_path_buf());

        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut file = fs_err::File::create(&self.path)?;
        for entry in known {
            writeln!(file, "{}", entry.display())?;
        }
        Ok(())
    }

    /// Removes a prefix from the registry.
    pub fn unregister(&self, prefix: &Path) -> std::io::Result<()> {
        let known = self.list()?;
        let remaining: Vec<&PathBuf> = known.iter().filter(|entry| *entry != prefix).collect();
        if remaining.len() == known.len() {
            return Ok(());
        }

        let mut file = fs_err::File::create(&self.path)?;
        for entry in remaining {
            writeln!(file, "{}", entry.display())?;
        }
        Ok(())
    }
}
