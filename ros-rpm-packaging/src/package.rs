// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ROS package identity and the names derived from it.

All externally visible names (RPM package name, tarball file name, tarball root
directory, output spec file name) are derived here so that the archive builder
and the spec patcher can never disagree about them.
*/

use std::path::{Path, PathBuf};

/// Version used when a package does not declare one.
pub const FALLBACK_VERSION: &str = "0.0.0";

/// The ROS distribution packages are built for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RosTarget {
    distro: String,
    install_prefix: String,
}

impl RosTarget {
    /// Construct an instance installing into `/opt/ros/<distro>`.
    pub fn new(distro: impl ToString) -> Self {
        let distro = distro.to_string();
        let install_prefix = format!("/opt/ros/{}", distro);

        Self {
            distro,
            install_prefix,
        }
    }

    /// Override the installation prefix.
    #[must_use]
    pub fn with_install_prefix(mut self, prefix: impl ToString) -> Self {
        self.install_prefix = prefix.to_string();
        self
    }

    /// The distribution name. e.g. `jazzy`.
    pub fn distro(&self) -> &str {
        &self.distro
    }

    /// The prefix packages install into.
    pub fn install_prefix(&self) -> &str {
        &self.install_prefix
    }
}

/// A package to process.
///
/// Instances are created once per package list entry and are read-only afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageDescriptor {
    name: String,
    path: PathBuf,
    version: String,
}

impl PackageDescriptor {
    pub fn new(name: impl ToString, path: impl AsRef<Path>, version: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            path: path.as_ref().to_path_buf(),
            version: version.to_string(),
        }
    }

    /// The package name as declared by ROS. e.g. `foo_bar`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem path of the package root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The package version. e.g. `1.2.3`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The name with underscores replaced by hyphens. e.g. `foo-bar`.
    pub fn hyphenated_name(&self) -> String {
        self.name.replace('_', "-")
    }

    /// The canonical RPM package name. e.g. `ros-jazzy-foo-bar`.
    pub fn rpm_name(&self, target: &RosTarget) -> String {
        format!("ros-{}-{}", target.distro(), self.hyphenated_name())
    }

    /// File name of the source tarball. e.g. `ros-jazzy-foo-bar_1.2.3.orig.tar.gz`.
    ///
    /// This is what `%{name}_%{version}.orig.tar.gz` expands to.
    pub fn archive_filename(&self, target: &RosTarget) -> String {
        format!("{}_{}.orig.tar.gz", self.rpm_name(target), self.version)
    }

    /// Top-level directory inside the source tarball. e.g. `ros-jazzy-foo-bar-1.2.3`.
    ///
    /// Matches `%{name}-%{version}`, which `%autosetup` expects.
    pub fn archive_root(&self, target: &RosTarget) -> String {
        format!("{}-{}", self.rpm_name(target), self.version)
    }

    /// File name of the patched spec. e.g. `foo-bar.spec`.
    pub fn spec_filename(&self) -> String {
        format!("{}.spec", self.hyphenated_name())
    }
}
