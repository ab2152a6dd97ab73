// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source archive (`orig` tarball) creation.

Archives are named `<rpm-name>_<version>.orig.tar.gz` and contain a single
top-level directory `<rpm-name>-<version>/`, which is what `%autosetup` in a
patched spec expects.

Two strategies are attempted in order. The native export asks `git archive` for
the committed tree of the package directory. If the package isn't in a Git
checkout or `git` fails, the fallback walks the filesystem and writes the tar
stream itself.
*/

use {
    crate::{
        error::{PackagingError, Result},
        package::{PackageDescriptor, RosTarget},
    },
    duct::cmd,
    log::{info, warn},
    std::{
        fs::File,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Name of the directory holding Git metadata.
const VCS_DIR: &str = ".git";

/// What happened when an archive was requested.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArchiveOutcome {
    /// Archive written from `git archive`.
    NativeExport(PathBuf),
    /// Archive written by walking the filesystem.
    FallbackExport(PathBuf),
    /// Archive already existed and was left alone.
    AlreadyExists(PathBuf),
}

impl ArchiveOutcome {
    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        match self {
            Self::NativeExport(p) | Self::FallbackExport(p) | Self::AlreadyExists(p) => p,
        }
    }

    /// Whether the archive was written by this invocation.
    pub fn is_new(&self) -> bool {
        !matches!(self, Self::AlreadyExists(_))
    }
}

/// Find the nearest ancestor of `path` (including itself) containing `.git`.
pub fn find_vcs_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| p.join(VCS_DIR).exists())
        .map(|p| p.to_path_buf())
}

/// Builds `orig` tarballs for packages.
#[derive(Clone, Debug)]
pub struct ArchiveBuilder {
    git_program: PathBuf,
    overwrite: bool,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self {
            git_program: PathBuf::from("git"),
            overwrite: false,
        }
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the executable used for native exports.
    #[must_use]
    pub fn with_git_program(mut self, program: impl AsRef<Path>) -> Self {
        self.git_program = program.as_ref().to_path_buf();
        self
    }

    /// Whether existing archives should be replaced.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Build the archive for a package into `dest_dir`.
    pub fn build(
        &self,
        package: &PackageDescriptor,
        target: &RosTarget,
        dest_dir: &Path,
    ) -> Result<ArchiveOutcome> {
        let dest_path = dest_dir.join(package.archive_filename(target));

        if dest_path.exists() && !self.overwrite {
            info!("{} already exists; not rebuilding", dest_path.display());
            return Ok(ArchiveOutcome::AlreadyExists(dest_path));
        }

        std::fs::create_dir_all(dest_dir)
            .map_err(|e| PackagingError::IoPath(dest_dir.display().to_string(), e))?;

        let package_root = std::fs::canonicalize(package.path())
            .map_err(|e| PackagingError::IoPath(package.path().display().to_string(), e))?;
        let archive_root = package.archive_root(target);

        let native_err = match self.try_native_export(&package_root, &archive_root, &dest_path) {
            Ok(()) => {
                info!("wrote {} via git archive", dest_path.display());
                return Ok(ArchiveOutcome::NativeExport(dest_path));
            }
            Err(e) => {
                remove_partial(&dest_path);
                warn!(
                    "{}: {}; falling back to filesystem export",
                    package.name(),
                    e
                );
                e
            }
        };

        match self.try_fallback_export(&package_root, &archive_root, &dest_path) {
            Ok(()) => {
                info!("wrote {} from filesystem", dest_path.display());
                Ok(ArchiveOutcome::FallbackExport(dest_path))
            }
            Err(e) => {
                remove_partial(&dest_path);

                Err(PackagingError::ArchiveFailed {
                    path: dest_path.display().to_string(),
                    native: native_err.to_string(),
                    fallback: e.to_string(),
                })
            }
        }
    }

    /// Export the committed tree of `package_root` with `git archive`.
    pub fn try_native_export(
        &self,
        package_root: &Path,
        archive_root: &str,
        dest_path: &Path,
    ) -> Result<()> {
        let vcs_root = find_vcs_root(package_root).ok_or_else(|| {
            PackagingError::ArchiveNativeExport(format!(
                "{} is not inside a Git checkout",
                package_root.display()
            ))
        })?;

        let subdir = package_root.strip_prefix(&vcs_root)?;
        let treeish = if subdir.as_os_str().is_empty() {
            "HEAD".to_string()
        } else {
            format!("HEAD:{}", subdir.display())
        };

        let args = vec![
            "-C".to_string(),
            vcs_root.display().to_string(),
            "archive".to_string(),
            "--format=tar".to_string(),
            format!("--prefix={}/", archive_root),
            treeish,
        ];

        let mut reader = cmd(&self.git_program, &args)
            .stderr_capture()
            .reader()
            .map_err(|e| PackagingError::ArchiveNativeExport(format!("running git: {}", e)))?;

        let fh = File::create(dest_path)
            .map_err(|e| PackagingError::IoPath(dest_path.display().to_string(), e))?;
        let mut encoder = gzip_encoder(fh)?;

        // Reading to EOF surfaces a non-zero exit as an error.
        std::io::copy(&mut reader, &mut encoder)
            .map_err(|e| PackagingError::ArchiveNativeExport(format!("git archive: {}", e)))?;

        encoder.finish().into_result()?.flush()?;

        Ok(())
    }

    /// Write a tarball of `package_root` by walking the filesystem.
    ///
    /// Entries are added in sorted order with deterministic headers. `.git`
    /// directories are skipped and symlinks are stored as links.
    pub fn try_fallback_export(
        &self,
        package_root: &Path,
        archive_root: &str,
        dest_path: &Path,
    ) -> Result<()> {
        let fh = File::create(dest_path)
            .map_err(|e| PackagingError::IoPath(dest_path.display().to_string(), e))?;

        let mut builder = tar::Builder::new(gzip_encoder(fh)?);
        builder.mode(tar::HeaderMode::Deterministic);
        builder.follow_symlinks(false);

        for path in fallback_entries(package_root)? {
            let rel = path.strip_prefix(package_root)?;
            let name = Path::new(archive_root).join(rel);

            builder.append_path_with_name(&path, &name).map_err(|e| {
                PackagingError::ArchiveFallbackExport(format!("{}: {}", path.display(), e))
            })?;
        }

        builder.into_inner()?.finish().into_result()?.flush()?;

        Ok(())
    }
}

/// Paths the fallback export writes, in order. The package root comes first.
pub fn fallback_entries(package_root: &Path) -> Result<Vec<PathBuf>> {
    let mut res = vec![];

    for entry in walkdir::WalkDir::new(package_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != VCS_DIR)
    {
        res.push(entry?.into_path());
    }

    Ok(res)
}

fn gzip_encoder<W: Write>(writer: W) -> Result<libflate::gzip::Encoder<W>> {
    let header = libflate::gzip::HeaderBuilder::new().finish();

    Ok(libflate::gzip::Encoder::with_options(
        writer,
        libflate::gzip::EncodeOptions::new().header(header),
    )?)
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("unable to remove partial archive {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, duct::cmd};

    fn archive_paths(path: &Path) -> Result<Vec<PathBuf>> {
        let mut archive = tar::Archive::new(libflate::gzip::Decoder::new(File::open(path)?)?);

        let mut res = vec![];
        for entry in archive.entries()? {
            res.push(entry?.path()?.to_path_buf());
        }

        Ok(res)
    }

    fn populate(root: &Path) -> Result<()> {
        std::fs::create_dir_all(root.join("src"))?;
        std::fs::create_dir_all(root.join(".git").join("objects"))?;
        std::fs::write(root.join("package.xml"), "<package/>")?;
        std::fs::write(root.join("CMakeLists.txt"), "project(foo)")?;
        std::fs::write(root.join("src").join("main.cpp"), "int main() {}")?;
        std::fs::write(root.join(".git").join("HEAD"), "ref: refs/heads/main")?;

        Ok(())
    }

    #[test]
    fn fallback_matches_enumeration() -> Result<()> {
        let td = tempfile::tempdir()?;
        let package_root = td.path().join("foo_bar");
        let dest = td.path().join("out");
        populate(&package_root)?;

        let target = RosTarget::new("jazzy");
        let package = PackageDescriptor::new("foo_bar", &package_root, "1.2.3");

        // The fake .git makes the native phase run, and the bogus program makes it fail.
        let builder = ArchiveBuilder::new().with_git_program(td.path().join("no-such-git"));
        let outcome = builder.build(&package, &target, &dest)?;

        let archive_path = dest.join("ros-jazzy-foo-bar_1.2.3.orig.tar.gz");
        assert_eq!(outcome, ArchiveOutcome::FallbackExport(archive_path.clone()));

        let canonical_root = std::fs::canonicalize(&package_root)?;
        let expected = fallback_entries(&canonical_root)?
            .into_iter()
            .map(|p| {
                let rel = p.strip_prefix(&canonical_root).unwrap();
                Path::new("ros-jazzy-foo-bar-1.2.3").join(rel)
            })
            .collect::<Vec<_>>();

        assert_eq!(archive_paths(&archive_path)?, expected);
        assert_eq!(
            expected,
            vec![
                PathBuf::from("ros-jazzy-foo-bar-1.2.3"),
                PathBuf::from("ros-jazzy-foo-bar-1.2.3/CMakeLists.txt"),
                PathBuf::from("ros-jazzy-foo-bar-1.2.3/package.xml"),
                PathBuf::from("ros-jazzy-foo-bar-1.2.3/src"),
                PathBuf::from("ros-jazzy-foo-bar-1.2.3/src/main.cpp"),
            ]
        );

        Ok(())
    }

    fn git(repo: &Path, args: &[&str]) -> Result<()> {
        let mut full = vec![
            "-C".to_string(),
            repo.display().to_string(),
            "-c".to_string(),
            "user.name=ROS Packager".to_string(),
            "-c".to_string(),
            "user.email=packager@example.com".to_string(),
            "-c".to_string(),
            "commit.gpgsign=false".to_string(),
        ];
        full.extend(args.iter().map(|a| a.to_string()));

        cmd("git", &full).stdout_null().stderr_null().run()?;

        Ok(())
    }

    #[test]
    fn native_export_of_committed_tree() -> Result<()> {
        if cmd!("git", "--version").stdout_null().run().is_err() {
            eprintln!("git not available; skipping");
            return Ok(());
        }

        let td = tempfile::tempdir()?;
        let repo = td.path().join("repo");
        let package_root = repo.join("src").join("foo_bar");
        std::fs::create_dir_all(package_root.join("src"))?;
        std::fs::write(repo.join("README.md"), "workspace")?;
        std::fs::write(package_root.join("package.xml"), "<package/>")?;
        std::fs::write(package_root.join("src").join("main.cpp"), "int main() {}")?;

        git(&repo, &["init", "-q"])?;
        git(&repo, &["add", "."])?;
        git(&repo, &["commit", "-q", "-m", "initial"])?;

        std::fs::write(package_root.join("scratch.txt"), "untracked")?;

        let target = RosTarget::new("jazzy");
        let package = PackageDescriptor::new("foo_bar", &package_root, "1.2.3");
        let dest = td.path().join("out");

        let outcome = ArchiveBuilder::new().build(&package, &target, &dest)?;
        let archive_path = dest.join("ros-jazzy-foo-bar_1.2.3.orig.tar.gz");
        assert_eq!(outcome, ArchiveOutcome::NativeExport(archive_path.clone()));

        let mut archive =
            tar::Archive::new(libflate::gzip::Decoder::new(File::open(&archive_path)?)?);
        let mut paths = vec![];
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type() != tar::EntryType::XGlobalHeader {
                paths.push(entry.path()?.to_path_buf());
            }
        }

        let root = Path::new("ros-jazzy-foo-bar-1.2.3");
        assert!(paths.iter().all(|p| p.starts_with(root)));
        assert!(paths.contains(&root.join("package.xml")));
        assert!(paths.contains(&root.join("src").join("main.cpp")));
        assert!(!paths.contains(&root.join("scratch.txt")));
        assert!(!paths.iter().any(|p| p.ends_with("README.md")));

        Ok(())
    }

    #[test]
    fn existing_archive_is_kept() -> Result<()> {
        let td = tempfile::tempdir()?;
        let package_root = td.path().join("pkg");
        populate(&package_root)?;

        let target = RosTarget::new("jazzy");
        let package = PackageDescriptor::new("pkg", &package_root, "0.1.0");
        let dest_path = td.path().join(package.archive_filename(&target));
        std::fs::write(&dest_path, b"sentinel")?;

        let builder = ArchiveBuilder::new().with_git_program(td.path().join("no-such-git"));

        assert_eq!(
            builder.build(&package, &target, td.path())?,
            ArchiveOutcome::AlreadyExists(dest_path.clone())
        );
        assert_eq!(std::fs::read(&dest_path)?, b"sentinel");

        let outcome = builder
            .with_overwrite(true)
            .build(&package, &target, td.path())?;
        assert!(outcome.is_new());
        assert_ne!(std::fs::read(&dest_path)?, b"sentinel");

        Ok(())
    }

    #[test]
    fn vcs_root_lookup() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = td.path().join("repo");
        let nested = root.join("src").join("pkg");
        std::fs::create_dir_all(&nested)?;
        std::fs::create_dir_all(root.join(".git"))?;

        assert_eq!(find_vcs_root(&nested), Some(root.clone()));
        assert_eq!(find_vcs_root(&root), Some(root));

        Ok(())
    }

    #[test]
    fn missing_package_root_fails() {
        let target = RosTarget::new("jazzy");
        let package = PackageDescriptor::new("gone", "/nonexistent/gone", "1.0.0");
        let td = tempfile::tempdir().unwrap();

        assert!(ArchiveBuilder::new()
            .build(&package, &target, td.path())
            .is_err());
    }
}
