// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::{info, LevelFilter},
    ros_rpm_packaging::{
        archive::ArchiveBuilder,
        batch::{BatchConfig, BatchDriver, BatchReport, OutcomeKind},
        error::PackagingError,
        generator::BloomGenerator,
        package::{PackageDescriptor, RosTarget},
        package_list::PackageList,
        spec_patch::patch_spec_text,
        version::{resolve_version, VersionOrigin},
    },
    serde::Deserialize,
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
    strum::IntoEnumIterator,
    thiserror::Error,
};

const DEFAULT_ROS_DISTRO: &str = "jazzy";

const PROCESS_ABOUT: &str = "\
Process every package in a package list.

For each package, this command:

1. Resolves the version from the package's `package.xml`.
2. Writes `<output-dir>/<name>/ros-<distro>-<name>_<version>.orig.tar.gz`.
3. Obtains a spec file: `<output-dir>/<name>/template.spec` if present, else
   the spec file written by a previous run (unless --overwrite), else the
   output of `bloom-generate rpm`.
4. Patches the spec file and writes `<output-dir>/<name>/<name>.spec` with
   underscores in the name replaced by hyphens.

The package list is the output of `colcon list`: one `<name> <path>` pair per
line. Relative paths are resolved against the workspace.

With --dry-run, nothing is written to the output directory. Each package
reports the files it would write or remove instead.

A summary is printed at the end. The exit code is non-zero if any package
failed or its spec generation timed out.

# YAML Configuration

Settings can be read from a YAML file given with --config. Arguments given on
the command line take precedence. All keys are optional:

workspace (string)
   Workspace root. Defaults to the current directory.

package_list (string)
   Path of the package list. Defaults to `<workspace>/pkg_list.txt`.

output_dir (string)
   Where per-package directories are written. Defaults to `<workspace>/repos`.

ros_distro (string)
   ROS distribution name. Defaults to `jazzy`.

install_prefix (string)
   Installation prefix. Defaults to `/opt/ros/<ros_distro>`.

os_name (string)
os_version (string)
   Passed to `bloom-generate`. Default to `rhel` and `9`.

os_override (string)
   Value of `ROS_OS_OVERRIDE` for `bloom-generate`. Defaults to `rhel9`.

workers (integer)
   Number of packages processed in parallel. Defaults to the number of CPUs.

timeout_seconds (integer)
   Time allowed for each `bloom-generate` invocation. Defaults to 60.

overwrite (bool)
   Rebuild archives and regenerate spec files that already exist.

require_version (bool)
   Skip packages without a declared version. Defaults to true.

generator_program (string)
   Path to `bloom-generate`.

git_program (string)
   Path to `git`.

dry_run (bool)
   Report what would be written without changing the output directory.
";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Packaging(#[from] PackagingError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("{failed} packages failed and {timeout} timed out")]
    PackagesFailed { failed: usize, timeout: usize },
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Settings of the `process` command.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    pub workspace: Option<PathBuf>,
    pub package_list: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub ros_distro: Option<String>,
    pub install_prefix: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub os_override: Option<String>,
    pub workers: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub overwrite: Option<bool>,
    pub require_version: Option<bool>,
    pub generator_program: Option<PathBuf>,
    pub git_program: Option<PathBuf>,
    pub dry_run: Option<bool>,
}

impl ProcessConfig {
    /// Load a configuration from a YAML file.
    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())?;

        Ok(serde_yaml::from_reader(f)?)
    }

    /// Apply values given on the command line.
    pub fn apply_args(&mut self, args: &ArgMatches) -> Result<()> {
        if let Some(v) = args.value_of_os("workspace") {
            self.workspace = Some(PathBuf::from(v));
        }
        if let Some(v) = args.value_of_os("package-list") {
            self.package_list = Some(PathBuf::from(v));
        }
        if let Some(v) = args.value_of_os("output-dir") {
            self.output_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = args.value_of("ros-distro") {
            self.ros_distro = Some(v.to_string());
        }
        if let Some(v) = args.value_of("install-prefix") {
            self.install_prefix = Some(v.to_string());
        }
        if let Some(v) = args.value_of("os-name") {
            self.os_name = Some(v.to_string());
        }
        if let Some(v) = args.value_of("os-version") {
            self.os_version = Some(v.to_string());
        }
        if let Some(v) = args.value_of("os-override") {
            self.os_override = Some(v.to_string());
        }
        if args.is_present("workers") {
            self.workers = Some(args.value_of_t("workers")?);
        }
        if args.is_present("timeout-seconds") {
            self.timeout_seconds = Some(args.value_of_t("timeout-seconds")?);
        }
        if args.is_present("overwrite") {
            self.overwrite = Some(true);
        }
        if args.is_present("allow-missing-version") {
            self.require_version = Some(false);
        }
        if let Some(v) = args.value_of_os("generator-program") {
            self.generator_program = Some(PathBuf::from(v));
        }
        if let Some(v) = args.value_of_os("git-program") {
            self.git_program = Some(PathBuf::from(v));
        }
        if args.is_present("dry-run") {
            self.dry_run = Some(true);
        }

        Ok(())
    }

    pub fn workspace(&self) -> PathBuf {
        self.workspace.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn package_list(&self) -> PathBuf {
        self.package_list
            .clone()
            .unwrap_or_else(|| self.workspace().join("pkg_list.txt"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.workspace().join("repos"))
    }

    pub fn target(&self) -> RosTarget {
        ros_target(self.ros_distro.as_deref(), self.install_prefix.as_deref())
    }

    pub fn batch_config(&self) -> BatchConfig {
        let mut config = BatchConfig::new(self.workspace(), self.output_dir(), self.target());

        config.workers = self.workers.unwrap_or_else(num_cpus::get).max(1);
        if let Some(seconds) = self.timeout_seconds {
            config.timeout = Duration::from_secs(seconds);
        }
        config.overwrite = self.overwrite.unwrap_or(false);
        config.require_version = self.require_version.unwrap_or(true);
        if let Some(program) = &self.git_program {
            config.git_program = program.clone();
        }
        config.dry_run = self.dry_run.unwrap_or(false);

        config
    }

    pub fn generator(&self) -> BloomGenerator {
        let defaults = BloomGenerator::new(self.target().distro());

        let generator = match (&self.os_name, &self.os_version) {
            (None, None) => defaults,
            (name, version) => defaults.with_os(
                name.as_deref().unwrap_or("rhel"),
                version.as_deref().unwrap_or("9"),
            ),
        };

        let generator = match &self.os_override {
            Some(value) => generator.with_os_override(value),
            None => generator,
        };

        match &self.generator_program {
            Some(program) => generator.with_program(program),
            None => generator,
        }
    }
}

fn ros_target(distro: Option<&str>, install_prefix: Option<&str>) -> RosTarget {
    let target = RosTarget::new(distro.unwrap_or(DEFAULT_ROS_DISTRO));

    match install_prefix {
        Some(prefix) => target.with_install_prefix(prefix),
        None => target,
    }
}

fn app() -> Command<'static> {
    let app = Command::new("ROS RPM Tool")
        .version("0.1")
        .about("Produce RPM spec files and source archives for ROS packages")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("ros-distro")
                .long("ros-distro")
                .takes_value(true)
                .global(true)
                .help("ROS distribution to package for [default: jazzy]"),
        )
        .arg(
            Arg::new("install-prefix")
                .long("install-prefix")
                .takes_value(true)
                .global(true)
                .help("Installation prefix [default: /opt/ros/<distro>]"),
        );

    let app = app.subcommand(
        Command::new("process")
            .about("Generate archives and patched spec files for a package list")
            .long_about(PROCESS_ABOUT)
            .arg(
                Arg::new("config")
                    .long("config")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path to a YAML file defining settings"),
            )
            .arg(
                Arg::new("workspace")
                    .long("workspace")
                    .short('w')
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Workspace root directory"),
            )
            .arg(
                Arg::new("package-list")
                    .long("package-list")
                    .short('l')
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path to the output of `colcon list`"),
            )
            .arg(
                Arg::new("output-dir")
                    .long("output-dir")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Directory receiving per-package output"),
            )
            .arg(
                Arg::new("os-name")
                    .long("os-name")
                    .takes_value(true)
                    .help("OS name passed to bloom-generate"),
            )
            .arg(
                Arg::new("os-version")
                    .long("os-version")
                    .takes_value(true)
                    .help("OS version passed to bloom-generate"),
            )
            .arg(
                Arg::new("os-override")
                    .long("os-override")
                    .takes_value(true)
                    .help("Value of ROS_OS_OVERRIDE for bloom-generate"),
            )
            .arg(
                Arg::new("workers")
                    .long("workers")
                    .takes_value(true)
                    .help("Number of packages to process in parallel"),
            )
            .arg(
                Arg::new("timeout-seconds")
                    .long("timeout-seconds")
                    .takes_value(true)
                    .help("Time allowed for each bloom-generate invocation"),
            )
            .arg(
                Arg::new("overwrite")
                    .long("overwrite")
                    .help("Rebuild archives and regenerate spec files that already exist"),
            )
            .arg(
                Arg::new("allow-missing-version")
                    .long("allow-missing-version")
                    .help("Process packages without a declared version as version 0.0.0"),
            )
            .arg(
                Arg::new("generator-program")
                    .long("generator-program")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path to bloom-generate"),
            )
            .arg(
                Arg::new("git-program")
                    .long("git-program")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path to git"),
            )
            .arg(
                Arg::new("dry-run")
                    .long("dry-run")
                    .help("Report what would be written without writing anything"),
            ),
    );

    let app = app.subcommand(
        Command::new("patch-spec")
            .about("Patch a single spec file")
            .arg(
                Arg::new("input")
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Spec file to patch"),
            )
            .arg(
                Arg::new("package")
                    .long("package")
                    .takes_value(true)
                    .required(true)
                    .help("ROS package name"),
            )
            .arg(
                Arg::new("output")
                    .long("output")
                    .short('o')
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Where to write the result. Printed to stdout if not given"),
            )
            .arg(
                Arg::new("dry-run")
                    .long("dry-run")
                    .help("Print the result instead of writing it to --output"),
            ),
    );

    let app = app.subcommand(
        Command::new("build-archive")
            .about("Build the orig tarball of a single package")
            .arg(
                Arg::new("path")
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Package root directory"),
            )
            .arg(
                Arg::new("package")
                    .long("package")
                    .takes_value(true)
                    .required(true)
                    .help("ROS package name"),
            )
            .arg(
                Arg::new("dest-dir")
                    .long("dest-dir")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to write the archive to"),
            )
            .arg(
                Arg::new("force")
                    .long("force")
                    .help("Replace an existing archive"),
            )
            .arg(
                Arg::new("git-program")
                    .long("git-program")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path to git"),
            ),
    );

    app.subcommand(
        Command::new("resolve-version")
            .about("Print the version declared by a package")
            .arg(
                Arg::new("path")
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Package root directory"),
            ),
    )
}

fn init_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();
}

pub async fn run_cli() -> Result<()> {
    let mut app = app();
    let matches = app.clone().get_matches();

    init_logging(&matches);

    match matches.subcommand() {
        Some(("process", args)) => command_process(args).await,
        Some(("patch-spec", args)) => command_patch_spec(args),
        Some(("build-archive", args)) => command_build_archive(args),
        Some(("resolve-version", args)) => command_resolve_version(args),
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

/// Render the outcome counts and problem packages of a batch.
pub fn format_summary(report: &BatchReport) -> String {
    let summary = &report.summary;

    let mut lines = vec!["summary:".to_string()];
    for kind in OutcomeKind::iter() {
        lines.push(format!("  {:<16}{:>6}", kind.as_ref(), summary.count(kind)));
    }
    lines.push(format!("  {:<16}{:>6}", "total", summary.total()));

    lines.push("archives:".to_string());
    for (label, count) in [
        ("git-archive", summary.native_exports),
        ("fallback-tar", summary.fallback_exports),
        ("existing", summary.existing_archives),
    ] {
        lines.push(format!("  {:<16}{:>6}", label, count));
    }

    if !summary.failed_packages.is_empty() {
        lines.push(format!("failed: {}", summary.failed_packages.join(", ")));
    }
    if !summary.timed_out_packages.is_empty() {
        lines.push(format!("timed out: {}", summary.timed_out_packages.join(", ")));
    }

    lines.join("\n")
}

async fn command_process(args: &ArgMatches) -> Result<()> {
    let mut config = match args.value_of_os("config") {
        Some(path) => ProcessConfig::from_yaml_path(path)?,
        None => ProcessConfig::default(),
    };
    config.apply_args(args)?;

    let list = PackageList::from_path(config.package_list())?;
    info!(
        "{} packages in {} ({} malformed lines skipped)",
        list.entries().len(),
        config.package_list().display(),
        list.malformed().len()
    );

    let driver = BatchDriver::new(config.batch_config(), config.generator());
    let report = driver.run(list.into_entries()).await?;

    for package in &report.packages {
        if let Some(message) = &package.outcome.message {
            println!("{}: {}: {}", package.name, package.outcome.kind, message);
        }
    }

    println!("{}", format_summary(&report));

    if report.summary.has_failures() {
        Err(ToolError::PackagesFailed {
            failed: report.summary.failed,
            timeout: report.summary.timeout,
        })
    } else {
        Ok(())
    }
}

fn command_patch_spec(args: &ArgMatches) -> Result<()> {
    let input = args
        .value_of_os("input")
        .expect("input argument is required");
    let name = args
        .value_of("package")
        .expect("package argument is required");

    let target = ros_target(args.value_of("ros-distro"), args.value_of("install-prefix"));
    let rpm_name = PackageDescriptor::new(name, input, "").rpm_name(&target);

    let text = std::fs::read_to_string(input)?;
    let patched = patch_spec_text(&text, &rpm_name, target.install_prefix());

    match args.value_of_os("output") {
        Some(output) if args.is_present("dry-run") => {
            info!("not writing {} (dry run)", Path::new(output).display());
            print!("{}", patched);
        }
        Some(output) => {
            std::fs::write(output, &patched)?;
            info!("wrote {}", Path::new(output).display());
        }
        None => print!("{}", patched),
    }

    Ok(())
}

fn command_build_archive(args: &ArgMatches) -> Result<()> {
    let path = PathBuf::from(args.value_of_os("path").expect("path argument is required"));
    let name = args
        .value_of("package")
        .expect("package argument is required");
    let dest_dir = PathBuf::from(
        args.value_of_os("dest-dir")
            .expect("dest-dir argument is required"),
    );

    let target = ros_target(args.value_of("ros-distro"), args.value_of("install-prefix"));
    let version = resolve_version(&path);
    let package = PackageDescriptor::new(name, &path, &version.version);

    let mut builder = ArchiveBuilder::new().with_overwrite(args.is_present("force"));
    if let Some(program) = args.value_of_os("git-program") {
        builder = builder.with_git_program(program);
    }

    let outcome = builder.build(&package, &target, &dest_dir)?;
    println!("{}", outcome.path().display());

    Ok(())
}

fn command_resolve_version(args: &ArgMatches) -> Result<()> {
    let path = args.value_of_os("path").expect("path argument is required");

    let resolved = resolve_version(path);
    match &resolved.origin {
        VersionOrigin::Manifest(manifest) => info!("read from {}", manifest.display()),
        VersionOrigin::Fallback => info!("no declared version; using fallback"),
    }

    println!("{}", resolved.version);

    Ok(())
}
