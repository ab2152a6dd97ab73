// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("directory walk error: {0:?}")]
    WalkDir(#[from] walkdir::Error),

    #[error("path prefix error: {0:?}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("XML parse error: {0}")]
    Xml(#[from] xml::reader::Error),

    #[error("package list not found: {0}")]
    PackageListNotFound(String),

    #[error("workspace root is not a directory: {0}")]
    WorkspaceRootMissing(String),

    #[error("package root is not a directory: {0}")]
    PackageRootMissing(String),

    #[error("native archive export failed: {0}")]
    ArchiveNativeExport(String),

    #[error("fallback archive export failed: {0}")]
    ArchiveFallbackExport(String),

    #[error("could not create archive {path}: native export: {native}; fallback: {fallback}")]
    ArchiveFailed {
        path: String,
        native: String,
        fallback: String,
    },

    #[error("spec generator failed: {0}")]
    GeneratorFailed(String),

    #[error("spec generator timed out after {0} seconds")]
    GeneratorTimeout(u64),

    #[error("spec generator did not produce {0}")]
    GeneratorMissingTemplate(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, PackagingError>;
