// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM packaging for ROS packages.

This crate turns the packages of a ROS workspace into inputs for `rpmbuild`:
a source tarball plus a spec file that installs into `/opt/ros/<distro>`.

Spec files come from `bloom-generate rpm`, which produces files assuming a
system-wide install under `/usr`. The core of this crate is a pipeline of
idempotent text transforms correcting them.

# A Tour of Functionality

[package::PackageDescriptor] and [package::RosTarget] define a package and
every name derived from it (RPM name, tarball name, tarball root directory, spec
file name).

[version::resolve_version] reads a package's version from its `package.xml`.

[archive::ArchiveBuilder] produces the `<rpm-name>_<version>.orig.tar.gz`
tarball, preferring `git archive` and falling back to walking the filesystem.

[spec_document::SpecDocument] holds the lines of a spec file and knows where
its sections are. [spec_patch::SpecPatcher] applies the
[spec_patch::TransformStep] pipeline to it. [spec_patch::patch_spec_text] is a
string-in, string-out convenience.

[generator::SpecGenerator] abstracts the external generator.
[generator::BloomGenerator] runs `bloom-generate` with a timeout.

[package_list::PackageList] parses `colcon list` output and
[batch::BatchDriver] processes every entry with a bounded pool of workers,
producing a [batch::BatchSummary].
*/

pub mod archive;
pub mod batch;
pub mod error;
pub mod generator;
pub mod package;
pub mod package_list;
pub mod spec_document;
pub mod spec_patch;
pub mod version;
