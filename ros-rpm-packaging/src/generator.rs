// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Generation of raw spec files.

The patcher consumes spec files emitted by an external generator. Only the
interface to that generator lives here: [SpecGenerator] abstracts it so the
batch driver can be exercised without the real tool, and [BloomGenerator] runs
`bloom-generate rpm`.
*/

use {
    crate::error::{PackagingError, Result},
    duct::cmd,
    log::{info, warn},
    std::{
        path::{Path, PathBuf},
        time::{Duration, Instant},
    },
};

/// Path of the generated spec file, relative to the package root.
pub const TEMPLATE_SPEC_PATH: &str = "rpm/template.spec";

/// How often a running generator is checked for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something that produces a raw spec file for a package.
pub trait SpecGenerator: Send + Sync {
    /// Generate a spec file for the package rooted at `package_root`.
    ///
    /// Returns the path of the generated file. Must give up with
    /// [PackagingError::GeneratorTimeout] once `timeout` elapses.
    fn generate(&self, package_root: &Path, timeout: Duration) -> Result<PathBuf>;
}

/// Runs `bloom-generate rpm`.
#[derive(Clone, Debug)]
pub struct BloomGenerator {
    program: PathBuf,
    ros_distro: String,
    os_name: String,
    os_version: String,
    os_override: String,
}

impl BloomGenerator {
    /// Construct an instance targeting RHEL 9, which bloom knows how to handle.
    pub fn new(ros_distro: impl ToString) -> Self {
        Self {
            program: PathBuf::from("bloom-generate"),
            ros_distro: ros_distro.to_string(),
            os_name: "rhel".to_string(),
            os_version: "9".to_string(),
            os_override: "rhel9".to_string(),
        }
    }

    #[must_use]
    pub fn with_program(mut self, program: impl AsRef<Path>) -> Self {
        self.program = program.as_ref().to_path_buf();
        self
    }

    /// Set the OS name and version passed on the command line.
    #[must_use]
    pub fn with_os(mut self, name: impl ToString, version: impl ToString) -> Self {
        self.os_name = name.to_string();
        self.os_version = version.to_string();
        self
    }

    /// Set the value of `ROS_OS_OVERRIDE` in the child environment.
    #[must_use]
    pub fn with_os_override(mut self, value: impl ToString) -> Self {
        self.os_override = value.to_string();
        self
    }

    /// Arguments passed to the generator program.
    pub fn args(&self) -> Vec<String> {
        vec![
            "rpm".to_string(),
            "--ros-distro".to_string(),
            self.ros_distro.clone(),
            "--os-name".to_string(),
            self.os_name.clone(),
            "--os-version".to_string(),
            self.os_version.clone(),
        ]
    }
}

impl SpecGenerator for BloomGenerator {
    fn generate(&self, package_root: &Path, timeout: Duration) -> Result<PathBuf> {
        if !package_root.is_dir() {
            return Err(PackagingError::PackageRootMissing(
                package_root.display().to_string(),
            ));
        }

        let args = self.args();
        info!(
            "running {} {} in {} (ROS_OS_OVERRIDE={})",
            self.program.display(),
            args.join(" "),
            package_root.display(),
            self.os_override
        );

        let handle = cmd(&self.program, &args)
            .dir(package_root)
            .env("ROS_OS_OVERRIDE", &self.os_override)
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|e| {
                PackagingError::GeneratorFailed(format!(
                    "unable to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let started = Instant::now();

        let output = loop {
            if let Some(output) = handle.try_wait()? {
                break output;
            }

            if started.elapsed() >= timeout {
                warn!(
                    "{} exceeded {}s in {}; killing",
                    self.program.display(),
                    timeout.as_secs(),
                    package_root.display()
                );
                handle.kill()?;

                return Err(PackagingError::GeneratorTimeout(timeout.as_secs()));
            }

            std::thread::sleep(POLL_INTERVAL);
        };

        if !output.status.success() {
            return Err(PackagingError::GeneratorFailed(format!(
                "{} exited with {} in {}: {}",
                self.program.display(),
                output.status,
                package_root.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let template = package_root.join(TEMPLATE_SPEC_PATH);

        if template.exists() {
            Ok(template)
        } else {
            Err(PackagingError::GeneratorMissingTemplate(
                template.display().to_string(),
            ))
        }
    }
}
