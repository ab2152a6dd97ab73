// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package list files.

A package list is the output of `colcon list`: one `<name> <path>` pair per line.
Blank lines and lines beginning with `#` are ignored.
*/

use {
    crate::error::{PackagingError, Result},
    log::warn,
    std::{
        io::BufRead,
        path::{Path, PathBuf},
    },
};

/// A well-formed line in a package list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageListEntry {
    pub name: String,
    pub path: PathBuf,
    pub line_number: usize,
}

impl PackageListEntry {
    /// Resolve the package root, interpreting relative paths against `workspace`.
    pub fn resolve_root(&self, workspace: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            workspace.join(&self.path)
        }
    }
}

/// A line that could not be interpreted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MalformedLine {
    pub line_number: usize,
    pub content: String,
}

/// A parsed package list.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageList {
    entries: Vec<PackageListEntry>,
    malformed: Vec<MalformedLine>,
}

impl PackageList {
    /// Parse a package list from a reader.
    ///
    /// Malformed lines are recorded and logged, never fatal.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut res = Self::default();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = i + 1;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut parts = trimmed.split_whitespace();

            match (parts.next(), parts.next()) {
                (Some(name), Some(path)) => {
                    res.entries.push(PackageListEntry {
                        name: name.to_string(),
                        path: PathBuf::from(path),
                        line_number,
                    });
                }
                _ => {
                    warn!("line {} in package list is malformed: {}", line_number, trimmed);
                    res.malformed.push(MalformedLine {
                        line_number,
                        content: trimmed.to_string(),
                    });
                }
            }
        }

        Ok(res)
    }

    /// Parse a package list from a filesystem path.
    ///
    /// A missing file is an error: there is nothing to process without it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PackagingError::PackageListNotFound(
                path.display().to_string(),
            ));
        }

        let fh = std::fs::File::open(path)
            .map_err(|e| PackagingError::IoPath(path.display().to_string(), e))?;

        Self::from_reader(std::io::BufReader::new(fh))
    }

    /// Well-formed entries, in file order.
    pub fn entries(&self) -> &[PackageListEntry] {
        &self.entries
    }

    /// Lines that were skipped because they could not be parsed.
    pub fn malformed(&self) -> &[MalformedLine] {
        &self.malformed
    }

    pub fn into_entries(self) -> Vec<PackageListEntry> {
        self.entries
    }
}
