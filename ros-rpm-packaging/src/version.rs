// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolve package versions from `package.xml` manifests. */

use {
    crate::{error::Result, package::FALLBACK_VERSION},
    log::warn,
    std::{
        io::Read,
        path::{Path, PathBuf},
    },
    xml::reader::{EventReader, XmlEvent},
};

/// File name of the ROS package manifest.
pub const MANIFEST_FILENAME: &str = "package.xml";

/// Where a resolved version came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VersionOrigin {
    /// Read from the given manifest file.
    Manifest(PathBuf),
    /// The manifest was missing, unparsable or had no version.
    Fallback,
}

/// A version string and its origin.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedVersion {
    pub version: String,
    pub origin: VersionOrigin,
}

impl ResolvedVersion {
    fn fallback() -> Self {
        Self {
            version: FALLBACK_VERSION.to_string(),
            origin: VersionOrigin::Fallback,
        }
    }

    /// Whether the version was read from a manifest.
    pub fn is_declared(&self) -> bool {
        matches!(self.origin, VersionOrigin::Manifest(_))
    }
}

/// Resolve the version of the package rooted at `package_root`.
///
/// This never fails. Problems are logged and the fallback version is returned.
pub fn resolve_version(package_root: impl AsRef<Path>) -> ResolvedVersion {
    let manifest_path = package_root.as_ref().join(MANIFEST_FILENAME);

    if !manifest_path.exists() {
        warn!("{} not found; using version {}", manifest_path.display(), FALLBACK_VERSION);
        return ResolvedVersion::fallback();
    }

    let fh = match std::fs::File::open(&manifest_path) {
        Ok(fh) => fh,
        Err(e) => {
            warn!("unable to open {}: {}", manifest_path.display(), e);
            return ResolvedVersion::fallback();
        }
    };

    match read_manifest_version(std::io::BufReader::new(fh)) {
        Ok(Some(version)) => ResolvedVersion {
            version,
            origin: VersionOrigin::Manifest(manifest_path),
        },
        Ok(None) => {
            warn!("no <version> element in {}", manifest_path.display());
            ResolvedVersion::fallback()
        }
        Err(e) => {
            warn!("failed to parse {}: {}", manifest_path.display(), e);
            ResolvedVersion::fallback()
        }
    }
}

/// An element whose tag ends in `version`, collecting its leading text.
struct Candidate {
    depth: usize,
    text: String,
}

/// Find the first non-empty version text in a manifest document.
///
/// The whole document is consumed so that malformed XML is reported even when a
/// version element precedes the error. An element's text is the character data
/// before its first child element.
pub fn read_manifest_version(reader: impl Read) -> Result<Option<String>> {
    let mut found: Option<String> = None;
    let mut candidate: Option<Candidate> = None;
    let mut depth = 0usize;

    for event in EventReader::new(reader) {
        match event? {
            XmlEvent::StartElement { name, .. } => {
                // A child element ends the text of an enclosing candidate.
                if let Some(c) = candidate.take() {
                    if found.is_none() && !c.text.trim().is_empty() {
                        found = Some(c.text.trim().to_string());
                    }
                }

                depth += 1;

                if found.is_none() && name.local_name.ends_with("version") {
                    candidate = Some(Candidate {
                        depth,
                        text: String::new(),
                    });
                }
            }
            XmlEvent::Characters(s) | XmlEvent::CData(s) | XmlEvent::Whitespace(s) => {
                if let Some(c) = candidate.as_mut() {
                    if c.depth == depth {
                        c.text.push_str(&s);
                    }
                }
            }
            XmlEvent::EndElement { .. } => {
                if let Some(c) = candidate.take() {
                    if c.depth == depth {
                        if found.is_none() && !c.text.trim().is_empty() {
                            found = Some(c.text.trim().to_string());
                        }
                    } else {
                        candidate = Some(c);
                    }
                }

                depth = depth.saturating_sub(1);
            }
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }

    Ok(found)
}
