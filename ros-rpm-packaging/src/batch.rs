// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Processing of whole package lists.

[BatchDriver] takes every entry of a package list through version resolution,
archive creation, spec generation and patching. Packages are independent and are
processed on a bounded number of blocking worker tasks. Per-package problems
become a [BatchOutcome]. Only problems affecting the whole batch are returned as
errors.
*/

use {
    crate::{
        archive::{ArchiveBuilder, ArchiveOutcome},
        error::{PackagingError, Result},
        generator::SpecGenerator,
        package::{PackageDescriptor, RosTarget},
        package_list::PackageListEntry,
        spec_patch::SpecPatcher,
        version::resolve_version,
    },
    futures::StreamExt,
    log::{debug, error, info, warn},
    std::{
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
    strum::{AsRefStr, Display, EnumIter, EnumString},
};

/// File name of a raw spec waiting to be patched in a package output directory.
pub const TEMPLATE_SPEC_FILENAME: &str = "template.spec";

/// Default number of packages processed concurrently.
pub const DEFAULT_WORKERS: usize = 8;

/// Default time allowed for generating one spec file.
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(60);

/// The result category of processing one package.
#[derive(AsRefStr, Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum OutcomeKind {
    /// A spec file was written or the archive was newly built.
    Patched,
    /// Archive and spec file were already up to date.
    SkippedExists,
    /// The package does not declare a version.
    NoVersion,
    /// Spec generation exceeded its time limit.
    Timeout,
    /// Any other problem.
    Failed,
}

/// Outcome of processing one package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchOutcome {
    pub kind: OutcomeKind,
    pub message: Option<String>,
}

impl BatchOutcome {
    pub fn new(kind: OutcomeKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: OutcomeKind, message: impl ToString) -> Self {
        Self {
            kind,
            message: Some(message.to_string()),
        }
    }

    fn from_error(e: PackagingError) -> Self {
        match &e {
            PackagingError::GeneratorTimeout(_) => Self::with_message(OutcomeKind::Timeout, e),
            _ => Self::with_message(OutcomeKind::Failed, e),
        }
    }
}

/// A package name and what happened to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageReport {
    pub name: String,
    pub outcome: BatchOutcome,
    /// How the archive was obtained. `None` if that stage wasn't reached.
    pub archive: Option<ArchiveOutcome>,
}

/// Aggregate counts over a batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchSummary {
    pub patched: usize,
    pub skipped_exists: usize,
    pub no_version: usize,
    pub timeout: usize,
    pub failed: usize,
    /// Archives written by `git archive`.
    pub native_exports: usize,
    /// Archives written by walking the filesystem.
    pub fallback_exports: usize,
    /// Archives that already existed.
    pub existing_archives: usize,
    /// Names of packages that failed, in input order.
    pub failed_packages: Vec<String>,
    /// Names of packages whose generator timed out, in input order.
    pub timed_out_packages: Vec<String>,
}

impl BatchSummary {
    /// Fold package reports into a summary.
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a PackageReport>) -> Self {
        reports.into_iter().fold(Self::default(), |mut summary, report| {
            match report.outcome.kind {
                OutcomeKind::Patched => summary.patched += 1,
                OutcomeKind::SkippedExists => summary.skipped_exists += 1,
                OutcomeKind::NoVersion => summary.no_version += 1,
                OutcomeKind::Timeout => {
                    summary.timeout += 1;
                    summary.timed_out_packages.push(report.name.clone());
                }
                OutcomeKind::Failed => {
                    summary.failed += 1;
                    summary.failed_packages.push(report.name.clone());
                }
            }

            match report.archive {
                Some(ArchiveOutcome::NativeExport(_)) => summary.native_exports += 1,
                Some(ArchiveOutcome::FallbackExport(_)) => summary.fallback_exports += 1,
                Some(ArchiveOutcome::AlreadyExists(_)) => summary.existing_archives += 1,
                None => {}
            }

            summary
        })
    }

    /// Number of packages with the given outcome.
    pub fn count(&self, kind: OutcomeKind) -> usize {
        match kind {
            OutcomeKind::Patched => self.patched,
            OutcomeKind::SkippedExists => self.skipped_exists,
            OutcomeKind::NoVersion => self.no_version,
            OutcomeKind::Timeout => self.timeout,
            OutcomeKind::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.patched + self.skipped_exists + self.no_version + self.timeout + self.failed
    }

    /// Whether any package failed or timed out.
    pub fn has_failures(&self) -> bool {
        self.failed + self.timeout > 0
    }
}

/// The result of a batch run.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    /// Per-package reports, in input order.
    pub packages: Vec<PackageReport>,
    pub summary: BatchSummary,
}

/// Settings for a batch run.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Directory relative package paths are resolved against.
    pub workspace: PathBuf,
    /// Directory receiving a `<name>/` directory per package.
    pub output_dir: PathBuf,
    pub target: RosTarget,
    /// Maximum number of packages processed concurrently.
    pub workers: usize,
    /// Time allowed for generating one spec file.
    pub timeout: Duration,
    /// Rebuild archives and regenerate spec files that already exist.
    pub overwrite: bool,
    /// Treat packages without a declared version as `no-version`.
    pub require_version: bool,
    /// Executable used for native archive exports.
    pub git_program: PathBuf,
    /// Report what would be written without touching the output directory.
    pub dry_run: bool,
}

impl BatchConfig {
    pub fn new(
        workspace: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        target: RosTarget,
    ) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            target,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_GENERATOR_TIMEOUT,
            overwrite: false,
            require_version: true,
            git_program: PathBuf::from("git"),
            dry_run: false,
        }
    }
}

/// Find the spec file to patch in a package output directory.
///
/// `template.spec` wins. Otherwise the previously written `spec_filename` is
/// reused, unless `overwrite` asks for it to be regenerated.
pub fn find_input_spec(dir: &Path, spec_filename: &str, overwrite: bool) -> Option<PathBuf> {
    let template = dir.join(TEMPLATE_SPEC_FILENAME);
    if template.is_file() {
        return Some(template);
    }

    let existing = dir.join(spec_filename);
    if !overwrite && existing.is_file() {
        Some(existing)
    } else {
        None
    }
}

/// Drives packages through the pipeline.
pub struct BatchDriver<G: SpecGenerator> {
    config: Arc<BatchConfig>,
    generator: Arc<G>,
}

impl<G: SpecGenerator + 'static> BatchDriver<G> {
    pub fn new(config: BatchConfig, generator: G) -> Self {
        Self {
            config: Arc::new(config),
            generator: Arc::new(generator),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process package list entries.
    ///
    /// Errors only if the workspace or output directory is unusable.
    pub async fn run(&self, entries: Vec<PackageListEntry>) -> Result<BatchReport> {
        if !self.config.workspace.is_dir() {
            return Err(PackagingError::WorkspaceRootMissing(
                self.config.workspace.display().to_string(),
            ));
        }

        if !self.config.dry_run {
            std::fs::create_dir_all(&self.config.output_dir).map_err(|e| {
                PackagingError::IoPath(self.config.output_dir.display().to_string(), e)
            })?;
        }

        info!(
            "processing {} packages with {} workers",
            entries.len(),
            self.config.workers
        );

        let fs = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let config = self.config.clone();
                let generator = self.generator.clone();
                let name = entry.name.clone();

                async move {
                    let res = tokio::task::spawn_blocking(move || {
                        process_package(&config, &*generator, &entry)
                    })
                    .await;

                    let report = res.unwrap_or_else(|e| PackageReport {
                        name,
                        outcome: BatchOutcome::with_message(
                            OutcomeKind::Failed,
                            format!("task failed: {}", e),
                        ),
                        archive: None,
                    });

                    (index, report)
                }
            })
            .collect::<Vec<_>>();

        let mut results = futures::stream::iter(fs)
            .buffer_unordered(self.config.workers.max(1))
            .collect::<Vec<_>>()
            .await;

        results.sort_by_key(|(index, _)| *index);
        let packages = results
            .into_iter()
            .map(|(_, report)| report)
            .collect::<Vec<_>>();

        let summary = BatchSummary::from_reports(&packages);

        Ok(BatchReport { packages, summary })
    }
}

/// Process a single package. Never fails: problems become the outcome.
pub fn process_package(
    config: &BatchConfig,
    generator: &dyn SpecGenerator,
    entry: &PackageListEntry,
) -> PackageReport {
    let root = entry.resolve_root(&config.workspace);
    info!("{}: processing {}", entry.name, root.display());

    if !root.is_dir() {
        warn!("{}: package root {} is not a directory", entry.name, root.display());
        let outcome = BatchOutcome::from_error(PackagingError::PackageRootMissing(
            root.display().to_string(),
        ));
        return finish_package(entry, outcome, None);
    }

    let resolved = resolve_version(&root);
    if !resolved.is_declared() && config.require_version {
        let outcome = BatchOutcome::with_message(
            OutcomeKind::NoVersion,
            format!("no version declared in {}", root.display()),
        );
        return finish_package(entry, outcome, None);
    }

    let package = PackageDescriptor::new(&entry.name, &root, &resolved.version);
    let package_dir = config.output_dir.join(package.name());

    let archive = if config.dry_run {
        None
    } else {
        let res = ArchiveBuilder::new()
            .with_git_program(&config.git_program)
            .with_overwrite(config.overwrite)
            .build(&package, &config.target, &package_dir);

        match res {
            Ok(archive) => Some(archive),
            Err(e) => return finish_package(entry, BatchOutcome::from_error(e), None),
        }
    };

    let outcome = if config.dry_run {
        plan_package(config, generator, &package, &package_dir)
    } else {
        stage_spec(config, generator, &package, &package_dir).map(|written| {
            let archive_new = archive.as_ref().map(|a| a.is_new()).unwrap_or(false);

            BatchOutcome::new(if archive_new || written {
                OutcomeKind::Patched
            } else {
                OutcomeKind::SkippedExists
            })
        })
    };

    finish_package(
        entry,
        outcome.unwrap_or_else(BatchOutcome::from_error),
        archive,
    )
}

fn finish_package(
    entry: &PackageListEntry,
    outcome: BatchOutcome,
    archive: Option<ArchiveOutcome>,
) -> PackageReport {
    match outcome.kind {
        OutcomeKind::Failed | OutcomeKind::Timeout => error!(
            "{}: {}: {}",
            entry.name,
            outcome.kind,
            outcome.message.as_deref().unwrap_or_default()
        ),
        kind => info!("{}: {}", entry.name, kind),
    }

    PackageReport {
        name: entry.name.clone(),
        outcome,
        archive,
    }
}

fn read_spec(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PackagingError::IoPath(path.display().to_string(), e))
}

/// Run the generator and take its output out of the package source tree.
fn generate_spec(
    config: &BatchConfig,
    generator: &dyn SpecGenerator,
    package: &PackageDescriptor,
) -> Result<String> {
    let generated = generator.generate(package.path(), config.timeout)?;
    info!("{}: patching generated {}", package.name(), generated.display());

    let text = read_spec(&generated)?;
    std::fs::remove_file(&generated)
        .map_err(|e| PackagingError::IoPath(generated.display().to_string(), e))?;

    // Fails unless the directory is now empty.
    if let Some(parent) = generated.parent() {
        if std::fs::remove_dir(parent).is_ok() {
            debug!("{}: removed {}", package.name(), parent.display());
        }
    }

    Ok(text)
}

/// Obtain the unpatched spec text for a package and patch it.
fn patched_spec(
    config: &BatchConfig,
    generator: &dyn SpecGenerator,
    package: &PackageDescriptor,
    package_dir: &Path,
) -> Result<String> {
    let input = match find_input_spec(package_dir, &package.spec_filename(), config.overwrite) {
        Some(path) => {
            info!("{}: patching {}", package.name(), path.display());
            read_spec(&path)?
        }
        None => generate_spec(config, generator, package)?,
    };

    Ok(SpecPatcher::for_package(package, &config.target).patch_text(&input))
}

/// Whether `path` is missing or has content other than `text`.
fn differs(path: &Path, text: &str) -> Result<bool> {
    Ok(!path.exists() || read_spec(path)? != text)
}

/// Write the patched spec file. Returns whether it was written.
fn stage_spec(
    config: &BatchConfig,
    generator: &dyn SpecGenerator,
    package: &PackageDescriptor,
    package_dir: &Path,
) -> Result<bool> {
    let template_path = package_dir.join(TEMPLATE_SPEC_FILENAME);
    let spec_path = package_dir.join(package.spec_filename());

    let patched = patched_spec(config, generator, package, package_dir)?;

    let written = if differs(&spec_path, &patched)? {
        std::fs::write(&spec_path, &patched)
            .map_err(|e| PackagingError::IoPath(spec_path.display().to_string(), e))?;
        info!("{}: wrote {}", package.name(), spec_path.display());
        true
    } else {
        false
    };

    if template_path.exists() {
        std::fs::remove_file(&template_path)
            .map_err(|e| PackagingError::IoPath(template_path.display().to_string(), e))?;
    }

    Ok(written)
}

/// Describe what processing a package would change, without changing it.
fn plan_package(
    config: &BatchConfig,
    generator: &dyn SpecGenerator,
    package: &PackageDescriptor,
    package_dir: &Path,
) -> Result<BatchOutcome> {
    let archive_path = package_dir.join(package.archive_filename(&config.target));
    let template_path = package_dir.join(TEMPLATE_SPEC_FILENAME);
    let spec_path = package_dir.join(package.spec_filename());

    let patched = patched_spec(config, generator, package, package_dir)?;
    debug!("{}: patched {}:\n{}", package.name(), spec_path.display(), patched);

    let mut actions = vec![];
    if config.overwrite || !archive_path.exists() {
        actions.push(format!("would write {}", archive_path.display()));
    }
    if differs(&spec_path, &patched)? {
        actions.push(format!("would write {}", spec_path.display()));
    }
    if template_path.exists() {
        actions.push(format!("would remove {}", template_path.display()));
    }

    Ok(if actions.is_empty() {
        BatchOutcome::new(OutcomeKind::SkippedExists)
    } else {
        BatchOutcome::with_message(OutcomeKind::Patched, actions.join("; "))
    })
}
