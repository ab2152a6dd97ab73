// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Patching of bloom-generated spec files.

`bloom-generate rpm` emits spec files that are valid but assume a system-wide
install. [SpecPatcher] rewrites them so that packages install into the ROS
prefix, are named `ros-<distro>-<name>`, reference the `orig` tarball produced
by [crate::archive], and don't produce debuginfo packages.

The rewrite is a fixed sequence of [TransformStep]. Every step is idempotent,
so running the patcher over its own output is a no-op. This allows previously
patched files to be processed again safely.
*/

use {
    crate::{
        package::{PackageDescriptor, RosTarget},
        spec_document::{SectionKind, SpecDocument},
    },
    log::debug,
    once_cell::sync::Lazy,
    regex::{NoExpand, Regex},
    strum::{AsRefStr, EnumIter, IntoEnumIterator},
};

/// Build conditionals every patched spec declares.
pub const BUILD_CONDITIONALS: [&str; 2] = ["%bcond_without tests", "%bcond_without weak_deps"];

/// Directive disabling debuginfo/debugsource sub-packages.
pub const DEBUG_PACKAGE_DIRECTIVE: &str = "%global debug_package %{nil}";

/// Value of the `Source0` field, expanding to the tarball file name.
pub const SOURCE_TEMPLATE: &str = "%{name}_%{version}.orig.tar.gz";

/// First line of the injected environment block.
pub const ENVIRONMENT_MARKER_BEGIN: &str = "# BEGIN ros_pythonpath";

/// Last line of the injected environment block.
pub const ENVIRONMENT_MARKER_END: &str = "# END ros_pythonpath";

/// CMake arguments carrying installation or search prefixes.
pub const CMAKE_PREFIX_FLAGS: [&str; 3] = [
    "-DCMAKE_INSTALL_PREFIX",
    "-DAMENT_PREFIX_PATH",
    "-DCMAKE_PREFIX_PATH",
];

static DEBUG_PACKAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^%(?:global|define)\s+debug_package\b").expect("static regex should compile")
});

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Name:").expect("static regex should compile"));

static SOURCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Source0?:\s*)").expect("static regex should compile"));

static LICENSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^License:").expect("static regex should compile"));

static CMAKE_FLAG_RES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    CMAKE_PREFIX_FLAGS
        .iter()
        .map(|flag| {
            (
                *flag,
                Regex::new(&format!(
                    r#"{}(?:\s+|=)(?:"[^"]*"|[^\s"\\-][^\s"\\]*)"#,
                    regex::escape(flag)
                ))
                .expect("flag regex should compile"),
            )
        })
        .collect()
});

/// A prefix flag whose value is on the next continuation line.
static CMAKE_BARE_FLAG_RE: Lazy<Regex> = Lazy::new(|| {
    let flags = CMAKE_PREFIX_FLAGS
        .iter()
        .map(|flag| regex::escape(flag))
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&format!(r"(?:{})\s*\\\s*$", flags)).expect("flag regex should compile")
});

/// The leading argument of a continuation line, unless it is another option.
static CONTINUED_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\s*)(?:"[^"]*"|[^\s"\\-][^\s"\\]*)"#).expect("static regex should compile")
});

static PY3_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(--prefix(?:\s+|=))("[^"]*"|\S+)"#).expect("static regex should compile")
});

/// Values the transforms substitute into a document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatchContext {
    /// Canonical RPM package name. e.g. `ros-jazzy-foo-bar`.
    pub rpm_name: String,
    /// Installation prefix. e.g. `/opt/ros/jazzy`.
    pub install_prefix: String,
}

impl PatchContext {
    pub fn new(package: &PackageDescriptor, target: &RosTarget) -> Self {
        Self {
            rpm_name: package.rpm_name(target),
            install_prefix: target.install_prefix().to_string(),
        }
    }
}

/// Whether a transform changed the document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    Unchanged,
    Modified,
}

impl StepOutcome {
    fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Modified
        } else {
            Self::Unchanged
        }
    }
}

/// A single rewrite of a spec document.
///
/// Variants are declared in application order. Later steps rely on earlier ones
/// having established the canonical preamble.
#[derive(AsRefStr, Clone, Copy, Debug, EnumIter, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum TransformStep {
    /// Declare the standard `%bcond_without` switches.
    BuildConditionals,
    /// Disable debug package generation exactly once.
    DisableDebugPackage,
    /// Rewrite the `Name:` field.
    CanonicalName,
    /// Rewrite the `Source0:` field.
    CanonicalSource,
    /// Point CMake prefix arguments at the install prefix.
    CmakePrefixArguments,
    /// Pass the install prefix to `%py3_install`.
    PythonInstallPrefix,
    /// Export `ROS_PREFIX` and `PYTHONPATH` in lifecycle sections.
    EnvironmentBootstrap,
    /// Collapse `%files` into the install prefix.
    FilesSection,
}

impl TransformStep {
    /// All steps, in the order they must be applied.
    pub fn pipeline() -> impl Iterator<Item = TransformStep> {
        Self::iter()
    }

    /// Apply this step to a document.
    pub fn apply(&self, doc: &mut SpecDocument, context: &PatchContext) -> StepOutcome {
        let before = doc.clone();

        match self {
            Self::BuildConditionals => ensure_build_conditionals(doc),
            Self::DisableDebugPackage => ensure_debug_package_disabled(doc),
            Self::CanonicalName => canonicalize_name(doc, &context.rpm_name),
            Self::CanonicalSource => canonicalize_source(doc),
            Self::CmakePrefixArguments => rewrite_cmake_prefixes(doc, &context.install_prefix),
            Self::PythonInstallPrefix => rewrite_py3_install(doc, &context.install_prefix),
            Self::EnvironmentBootstrap => inject_environment(doc, &context.install_prefix),
            Self::FilesSection => canonicalize_files(doc, &context.install_prefix),
        }

        StepOutcome::from_changed(*doc != before)
    }
}

/// Applies the full transform pipeline to spec documents.
#[derive(Clone, Debug)]
pub struct SpecPatcher {
    context: PatchContext,
}

impl SpecPatcher {
    pub fn new(context: PatchContext) -> Self {
        Self { context }
    }

    /// Construct an instance for a package built for a ROS distribution.
    pub fn for_package(package: &PackageDescriptor, target: &RosTarget) -> Self {
        Self::new(PatchContext::new(package, target))
    }

    pub fn context(&self) -> &PatchContext {
        &self.context
    }

    /// Apply every transform, returning the steps that modified the document.
    pub fn patch(&self, doc: &mut SpecDocument) -> Vec<TransformStep> {
        let mut modified = vec![];

        for step in TransformStep::pipeline() {
            let outcome = step.apply(doc, &self.context);
            debug!("{}: {} {:?}", self.context.rpm_name, step.as_ref(), outcome);

            if outcome == StepOutcome::Modified {
                modified.push(step);
            }
        }

        modified
    }

    /// Patch spec file content.
    pub fn patch_text(&self, text: &str) -> String {
        let mut doc = SpecDocument::from(text);
        self.patch(&mut doc);

        doc.to_string()
    }
}

/// Patch spec file content for a given RPM name and install prefix.
pub fn patch_spec_text(text: &str, rpm_name: &str, install_prefix: &str) -> String {
    SpecPatcher::new(PatchContext {
        rpm_name: rpm_name.to_string(),
        install_prefix: install_prefix.to_string(),
    })
    .patch_text(text)
}

fn ensure_build_conditionals(doc: &mut SpecDocument) {
    let existing = doc
        .iter_lines()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("%bcond_without"))
        .map(|l| l.to_string())
        .collect::<Vec<_>>();

    let missing = BUILD_CONDITIONALS
        .iter()
        .filter(|wanted| !existing.iter().any(|l| l == *wanted))
        .copied()
        .chain(std::iter::once(""))
        .collect::<Vec<_>>();

    // Only the trailing blank separator.
    if missing.len() == 1 {
        return;
    }

    doc.trim_leading_empty_lines();
    doc.insert_lines(0, &missing);
}

fn ensure_debug_package_disabled(doc: &mut SpecDocument) {
    let directives = doc.find_all_in(&DEBUG_PACKAGE_RE, 0..doc.len());

    if let Some((_, duplicates)) = directives.split_first() {
        for duplicate in duplicates.iter().rev() {
            doc.remove_line(duplicate.line);
        }

        return;
    }

    let last_bcond = doc
        .iter_lines()
        .enumerate()
        .filter(|(_, l)| l.trim_start().starts_with("%bcond_without"))
        .map(|(i, _)| i)
        .last();

    match last_bcond {
        Some(index) => {
            let position = doc
                .iter_lines()
                .enumerate()
                .skip(index + 1)
                .find(|(_, l)| !l.trim().is_empty())
                .map(|(i, _)| i)
                .unwrap_or_else(|| doc.len());

            doc.insert_lines(position, &[DEBUG_PACKAGE_DIRECTIVE, ""]);
        }
        None => {
            doc.trim_leading_empty_lines();
            doc.insert_lines(0, &[DEBUG_PACKAGE_DIRECTIVE, ""]);
        }
    }
}

/// Keep the first preamble line matching `re` and remove the others.
///
/// Returns the index of the kept line.
fn dedupe_preamble_field(doc: &mut SpecDocument, re: &Regex) -> Option<usize> {
    let matches = doc.find_all_in(re, doc.preamble());
    let (first, duplicates) = matches.split_first()?;

    for duplicate in duplicates.iter().rev() {
        doc.remove_line(duplicate.line);
    }

    Some(first.line)
}

fn canonicalize_name(doc: &mut SpecDocument, rpm_name: &str) {
    let line = format!("Name:           {}", rpm_name);

    match dedupe_preamble_field(doc, &NAME_RE) {
        Some(index) => doc.set_line(index, line),
        None => doc.insert_lines(0, &[line]),
    }
}

fn canonicalize_source(doc: &mut SpecDocument) {
    if let Some(index) = dedupe_preamble_field(doc, &SOURCE_RE) {
        let current = doc.line(index).unwrap_or_default();
        let keyword = SOURCE_RE
            .captures(current)
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| "Source0: ".to_string());

        doc.set_line(index, format!("{}{}", keyword, SOURCE_TEMPLATE));
        return;
    }

    let line = format!("Source0: {}", SOURCE_TEMPLATE);

    let preamble = doc.preamble();

    if let Some(license) = doc.find_all_in(&LICENSE_RE, preamble.clone()).first() {
        doc.insert_lines(license.line + 1, &[line]);
    } else if preamble.end == doc.len() {
        doc.trim_trailing_blank_lines();
        doc.push_lines(&[line]);
    } else {
        // Sections follow. Appending after them would place the field in a
        // section body, so it goes after the last non-blank preamble line.
        let position = doc
            .iter_lines()
            .take(preamble.end)
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, _)| i + 1)
            .last()
            .unwrap_or(0);

        doc.insert_lines(position, &[line]);
    }
}

/// Rewrite lines in lifecycle section bodies with a function returning the new content.
fn rewrite_lifecycle_lines(doc: &mut SpecDocument, f: impl Fn(&str) -> Option<String>) {
    for index in doc.section_body_lines(|kind| kind.is_lifecycle()) {
        if let Some(new) = doc.line(index).and_then(&f) {
            doc.set_line(index, new);
        }
    }
}

fn rewrite_cmake_prefixes(doc: &mut SpecDocument, install_prefix: &str) {
    let quoted = format!(r#""{}""#, install_prefix);
    let mut value_line = None;

    for index in doc.section_body_lines(|kind| kind.is_lifecycle()) {
        let line = match doc.line(index) {
            Some(line) => line.to_string(),
            None => continue,
        };

        let mut value = line.clone();

        if value_line.take() == Some(index) {
            value = CONTINUED_VALUE_RE
                .replace(&value, |caps: &regex::Captures| format!("{}{}", &caps[1], quoted))
                .into_owned();
        }

        if CMAKE_PREFIX_FLAGS.iter().any(|flag| value.contains(flag)) {
            for (flag, re) in CMAKE_FLAG_RES.iter() {
                let replacement = format!("{}={}", flag, quoted);
                value = re.replace_all(&value, NoExpand(&replacement)).into_owned();
            }

            if CMAKE_BARE_FLAG_RE.is_match(&value) {
                value_line = Some(index + 1);
            }
        }

        if value != line {
            doc.set_line(index, value);
        }
    }
}

fn rewrite_py3_install(doc: &mut SpecDocument, install_prefix: &str) {
    rewrite_lifecycle_lines(doc, |line| {
        if !line.contains("%py3_install") {
            return None;
        }

        if line.contains("--prefix") {
            Some(
                PY3_PREFIX_RE
                    .replace_all(line, |caps: &regex::Captures| {
                        format!(r#"{}"{}""#, &caps[1], install_prefix)
                    })
                    .into_owned(),
            )
        } else if line.contains("--") {
            // Any `--` is taken to be the separator for extra setup.py arguments,
            // even if it belongs to something else on the line.
            Some(format!(r#"{} --prefix "{}""#, line, install_prefix))
        } else {
            Some(format!(r#"{} -- --prefix "{}""#, line, install_prefix))
        }
    });
}

/// Lines injected at the start of lifecycle sections.
pub fn environment_block(install_prefix: &str) -> Vec<String> {
    vec![
        ENVIRONMENT_MARKER_BEGIN.to_string(),
        format!(r#"export ROS_PREFIX="{}""#, install_prefix),
        concat!(
            r#"export PYTHONPATH="$ROS_PREFIX/lib64/python%{python3_version}/site-packages:"#,
            r#"$ROS_PREFIX/lib/python%{python3_version}/site-packages:${PYTHONPATH}""#
        )
        .to_string(),
        ENVIRONMENT_MARKER_END.to_string(),
        String::new(),
    ]
}

fn inject_environment(doc: &mut SpecDocument, install_prefix: &str) {
    if doc.contains(ENVIRONMENT_MARKER_BEGIN) {
        return;
    }

    let block = environment_block(install_prefix);

    for kind in SectionKind::lifecycle() {
        if let Some(header) = doc.find_section(kind, 0) {
            doc.insert_lines(header.line + 1, &block);
        }
    }
}

fn canonicalize_files(doc: &mut SpecDocument, install_prefix: &str) {
    let section = [SectionKind::Files.marker(), install_prefix.to_string()];

    match doc.find_section(SectionKind::Files, 0) {
        Some(files) => {
            let end = doc
                .find_section(SectionKind::Changelog, files.line + 1)
                .map(|changelog| changelog.line)
                .unwrap_or_else(|| doc.len());

            doc.replace_lines(files.line..end, &section);
        }
        None => match doc.find_section(SectionKind::Changelog, 0) {
            Some(changelog) => doc.insert_lines(changelog.line, &section),
            None => {
                doc.trim_trailing_blank_lines();
                if !doc.is_empty() {
                    doc.push_lines(&[""]);
                }
                doc.push_lines(&section);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    const PREFIX: &str = "/opt/ros/jazzy";
    const RPM_NAME: &str = "ros-jazzy-foo-bar";

    /// Roughly what `bloom-generate rpm` emits for an ament_cmake package.
    const BLOOM_CMAKE: &str = indoc! {r#"
        %bcond_without tests
        %bcond_without weak_deps

        %global __os_install_post %(echo '%{__os_install_post}' | sed -e 's!/usr/lib[^[:space:]]*/brp-python-bytecompile[[:space:]].*$!!g')
        %global __provides_exclude_from ^/opt/ros/jazzy/.*$
        %global __requires_exclude_from ^/opt/ros/jazzy/.*$

        Name:           ros-jazzy-foo_bar
        Version:        1.2.3
        Release:        1%{?dist}%{?release_suffix}
        Summary:        ROS foo_bar package

        License:        Apache License 2.0
        Source0:        %{name}-%{version}.tar.gz

        Requires:       ros-jazzy-rclcpp
        BuildRequires:  ros-jazzy-ament-cmake

        %description
        Name: this line is prose and must survive.

        %prep
        %autosetup -p1

        %build
        # In case we're installing to a non-standard location, look for a setup.sh
        # in the install tree and source it.  It will set things like
        # CMAKE_PREFIX_PATH, PKG_CONFIG_PATH, and PYTHONPATH.
        if [ -f "/opt/ros/jazzy/setup.sh" ]; then . "/opt/ros/jazzy/setup.sh"; fi
        mkdir -p .obj-%{_target_platform} && cd .obj-%{_target_platform}
        %cmake3 \
            -UINCLUDE_INSTALL_DIR \
            -ULIB_INSTALL_DIR \
            -USYSCONF_INSTALL_DIR \
            -USHARE_INSTALL_PREFIX \
            -ULIB_SUFFIX \
            -DCMAKE_INSTALL_PREFIX="/usr" \
            -DAMENT_PREFIX_PATH=/usr \
            -DCMAKE_PREFIX_PATH "/usr" \
            -DSETUPTOOLS_DEB_LAYOUT=OFF \
        %if !0%{?with_tests}
            -DBUILD_TESTING=OFF \
        %endif
            ..

        %make_build

        %install
        %make_install -C .obj-%{_target_platform}

        %if 0%{?with_tests}
        %check
        if [ -f "/opt/ros/jazzy/setup.sh" ]; then . "/opt/ros/jazzy/setup.sh"; fi
        CTEST_OUTPUT_ON_FAILURE=1 \
            %make_build -C .obj-%{_target_platform} test || echo "RPM TESTS FAILED"
        %else
        echo "Skipping tests"
        %endif

        %files
        %license LICENSE
        /opt/ros/jazzy

        %files devel
        /opt/ros/jazzy/include

        %changelog
        * Mon Jan 01 2024 Jane Doe <jane@example.com> - 1.2.3-1
        - Autogenerated by Bloom
    "#};

    const BLOOM_PYTHON: &str = indoc! {r#"
        Name:           ros-jazzy-py-pkg
        Version:        0.1.0
        Release:        1%{?dist}
        License:        BSD

        %description
        A Python package.

        %build
        %py3_build

        %install
        %py3_install -- --prefix "/usr"

        %files
        /usr

        %changelog
    "#};

    fn context() -> PatchContext {
        PatchContext {
            rpm_name: RPM_NAME.to_string(),
            install_prefix: PREFIX.to_string(),
        }
    }

    fn doc(s: &str) -> SpecDocument {
        SpecDocument::from(s)
    }

    fn apply(step: TransformStep, s: &str) -> String {
        let mut d = doc(s);
        step.apply(&mut d, &context());
        d.to_string()
    }

    fn count(haystack: &str, pred: impl Fn(&str) -> bool) -> usize {
        haystack.lines().filter(|l| pred(l)).count()
    }

    #[test]
    fn every_step_is_idempotent() {
        let inputs = [
            BLOOM_CMAKE,
            BLOOM_PYTHON,
            "",
            "\n\n",
            "License: MIT",
            "%files\n/usr\n%files devel\n/x\n",
            "%global debug_package %{nil}\n%define debug_package %{nil}\nName: x\nName: y\n",
            "%install\n%py3_install\n%py3_install -- --root=/x\n",
        ];

        for input in inputs {
            for step in TransformStep::pipeline() {
                let once = apply(step, input);
                let twice = apply(step, &once);
                assert_eq!(once, twice, "{} is idempotent on {:?}", step.as_ref(), input);
            }
        }
    }

    #[test]
    fn pipeline_is_idempotent() {
        for input in [BLOOM_CMAKE, BLOOM_PYTHON, "", "Name: x\n"] {
            let once = patch_spec_text(input, RPM_NAME, PREFIX);
            let twice = patch_spec_text(&once, RPM_NAME, PREFIX);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn steps_report_modifications() {
        let patcher = SpecPatcher::new(context());

        let mut d = doc(BLOOM_PYTHON);
        let modified = patcher.patch(&mut d);
        assert!(modified.contains(&TransformStep::BuildConditionals));
        assert!(modified.contains(&TransformStep::CanonicalName));
        assert!(!modified.contains(&TransformStep::CmakePrefixArguments));

        assert!(patcher.patch(&mut d).is_empty());
    }

    #[test]
    fn build_conditionals_prepended() {
        assert_eq!(
            apply(TransformStep::BuildConditionals, "\n\nName: x\n"),
            "%bcond_without tests\n%bcond_without weak_deps\n\nName: x\n"
        );

        assert_eq!(
            apply(
                TransformStep::BuildConditionals,
                "Name: x\n%bcond_without weak_deps\n%bcond_without other\n"
            ),
            "%bcond_without tests\n\nName: x\n%bcond_without weak_deps\n%bcond_without other\n"
        );

        assert_eq!(apply(TransformStep::BuildConditionals, BLOOM_CMAKE), BLOOM_CMAKE);
    }

    #[test]
    fn debug_package_after_conditionals() {
        let out = apply(
            TransformStep::DisableDebugPackage,
            "%bcond_without tests\n\n\nName: x\n",
        );
        assert_eq!(
            out,
            "%bcond_without tests\n\n\n%global debug_package %{nil}\n\nName: x\n"
        );

        assert_eq!(
            apply(TransformStep::DisableDebugPackage, "\nName: x\n"),
            "%global debug_package %{nil}\n\nName: x\n"
        );
    }

    #[test]
    fn debug_package_deduplicated() {
        let out = apply(
            TransformStep::DisableDebugPackage,
            "%define debug_package %{nil}\nName: x\n%global debug_package %{nil}\n",
        );
        assert_eq!(out, "%define debug_package %{nil}\nName: x\n");
    }

    #[test]
    fn name_replaced_in_preamble_only() {
        let out = apply(TransformStep::CanonicalName, BLOOM_CMAKE);

        assert!(out.contains("Name:           ros-jazzy-foo-bar\n"));
        assert!(!out.contains("ros-jazzy-foo_bar"));
        assert!(out.contains("Name: this line is prose and must survive.\n"));
    }

    #[test]
    fn name_duplicates_removed() {
        assert_eq!(
            apply(TransformStep::CanonicalName, "Name: a\nVersion: 1\nName: b\n"),
            format!("Name:           {}\nVersion: 1\n", RPM_NAME)
        );
    }

    #[test]
    fn name_inserted_at_top() {
        assert_eq!(
            apply(TransformStep::CanonicalName, "Version: 1\n"),
            format!("Name:           {}\nVersion: 1\n", RPM_NAME)
        );
    }

    #[test]
    fn source_keeps_keyword_and_spacing() {
        let out = apply(TransformStep::CanonicalSource, BLOOM_CMAKE);
        assert!(out.contains("Source0:        %{name}_%{version}.orig.tar.gz\n"));

        assert_eq!(
            apply(TransformStep::CanonicalSource, "Source: foo.tgz\nSource0: bar.tgz\n"),
            "Source: %{name}_%{version}.orig.tar.gz\n"
        );

        // Numbered sources other than 0 are left alone.
        assert_eq!(
            apply(TransformStep::CanonicalSource, "Source0: a\nSource1: b\n"),
            "Source0: %{name}_%{version}.orig.tar.gz\nSource1: b\n"
        );
    }

    #[test]
    fn source_inserted_after_license() {
        assert_eq!(
            apply(TransformStep::CanonicalSource, "Name: x\nLicense: MIT\nURL: u\n"),
            "Name: x\nLicense: MIT\nSource0: %{name}_%{version}.orig.tar.gz\nURL: u\n"
        );
    }

    #[test]
    fn source_appended_without_license() {
        assert_eq!(
            apply(TransformStep::CanonicalSource, "Name: x\n\n\n"),
            "Name: x\nSource0: %{name}_%{version}.orig.tar.gz\n"
        );
        assert_eq!(
            apply(TransformStep::CanonicalSource, "Name: x"),
            "Name: x\nSource0: %{name}_%{version}.orig.tar.gz\n"
        );
    }

    #[test]
    fn source_inserted_before_sections() {
        assert_eq!(
            apply(TransformStep::CanonicalSource, "Name: x\n\n%description\nd\n%changelog\n"),
            "Name: x\nSource0: %{name}_%{version}.orig.tar.gz\n\n%description\nd\n%changelog\n"
        );
    }

    #[test]
    fn name_and_source_order_insensitive() {
        let inputs = [
            "",
            "Version: 1\n",
            "Version: 1\nLicense: MIT\n\n%description\nfoo\n",
            "Version: 1\n\n%description\nfoo\n",
            "%description\nfoo",
            "Summary: s",
        ];

        for input in inputs {
            let a = apply(
                TransformStep::CanonicalSource,
                &apply(TransformStep::CanonicalName, input),
            );
            let b = apply(
                TransformStep::CanonicalName,
                &apply(TransformStep::CanonicalSource, input),
            );
            assert_eq!(a, b, "order insensitive on {:?}", input);
        }
    }

    #[test]
    fn cmake_prefixes_rewritten() {
        let out = apply(TransformStep::CmakePrefixArguments, BLOOM_CMAKE);

        assert!(out.contains(r#"    -DCMAKE_INSTALL_PREFIX="/opt/ros/jazzy" \"#));
        assert!(out.contains(r#"    -DAMENT_PREFIX_PATH="/opt/ros/jazzy" \"#));
        assert!(out.contains(r#"    -DCMAKE_PREFIX_PATH="/opt/ros/jazzy" \"#));
        assert!(!out.contains("=/usr"));
    }

    #[test]
    fn cmake_prefixes_multiple_per_line() {
        let input = "%build\n%cmake3 -DCMAKE_INSTALL_PREFIX=/usr -DCMAKE_PREFIX_PATH='' ..\n";
        assert_eq!(
            apply(TransformStep::CmakePrefixArguments, input),
            "%build\n%cmake3 -DCMAKE_INSTALL_PREFIX=\"/opt/ros/jazzy\" -DCMAKE_PREFIX_PATH=\"/opt/ros/jazzy\" ..\n"
        );
    }

    #[test]
    fn cmake_prefix_value_on_continuation_line() {
        let input = indoc! {r#"
            %build
            %cmake3 \
                -DCMAKE_INSTALL_PREFIX \
                /usr \
                -DCMAKE_PREFIX_PATH \
                -DBUILD_TESTING=OFF \
                ..
        "#};

        let out = apply(TransformStep::CmakePrefixArguments, input);
        assert_eq!(
            out,
            indoc! {r#"
                %build
                %cmake3 \
                    -DCMAKE_INSTALL_PREFIX \
                    "/opt/ros/jazzy" \
                    -DCMAKE_PREFIX_PATH \
                    -DBUILD_TESTING=OFF \
                    ..
            "#}
        );
        assert_eq!(apply(TransformStep::CmakePrefixArguments, &out), out);
    }

    #[test]
    fn cmake_prefix_keeps_line_continuation() {
        assert_eq!(
            apply(
                TransformStep::CmakePrefixArguments,
                "%build\n%cmake3 -DCMAKE_INSTALL_PREFIX /usr \\\n  ..\n"
            ),
            "%build\n%cmake3 -DCMAKE_INSTALL_PREFIX=\"/opt/ros/jazzy\" \\\n  ..\n"
        );

        let input = "%build\n%cmake3 -DCMAKE_PREFIX_PATH -DBUILD_TESTING=OFF ..\n";
        assert_eq!(apply(TransformStep::CmakePrefixArguments, input), input);
    }

    #[test]
    fn cmake_prefixes_outside_lifecycle_untouched() {
        let input = "%description\nUse -DCMAKE_INSTALL_PREFIX=/usr to install.\n";
        assert_eq!(apply(TransformStep::CmakePrefixArguments, input), input);
    }

    #[test]
    fn py3_install_prefix_replaced() {
        let out = apply(TransformStep::PythonInstallPrefix, BLOOM_PYTHON);
        assert!(out.contains("%py3_install -- --prefix \"/opt/ros/jazzy\"\n"));

        assert_eq!(
            apply(TransformStep::PythonInstallPrefix, "%install\n%py3_install -- --prefix=/usr\n"),
            "%install\n%py3_install -- --prefix=\"/opt/ros/jazzy\"\n"
        );
    }

    #[test]
    fn py3_install_prefix_appended() {
        assert_eq!(
            apply(TransformStep::PythonInstallPrefix, "%install\n%py3_install\n"),
            "%install\n%py3_install -- --prefix \"/opt/ros/jazzy\"\n"
        );
        assert_eq!(
            apply(TransformStep::PythonInstallPrefix, "%install\n%py3_install -- --root=/x\n"),
            "%install\n%py3_install -- --root=/x --prefix \"/opt/ros/jazzy\"\n"
        );
    }

    #[test]
    fn py3_install_unrelated_double_dash() {
        // The separator heuristic treats any `--` as the extra-arguments separator.
        assert_eq!(
            apply(TransformStep::PythonInstallPrefix, "%install\n%py3_install --verbose\n"),
            "%install\n%py3_install --verbose --prefix \"/opt/ros/jazzy\"\n"
        );
    }

    #[test]
    fn environment_without_check_section() {
        let input = "%build\nmake\n\n%install\nmake install\n\n%files\n/x\n";
        let out = apply(TransformStep::EnvironmentBootstrap, input);

        assert_eq!(count(&out, |l| l == ENVIRONMENT_MARKER_BEGIN), 2);
        assert!(out.starts_with(&format!(
            "%build\n{}\nexport ROS_PREFIX=\"/opt/ros/jazzy\"\n",
            ENVIRONMENT_MARKER_BEGIN
        )));

        let full = patch_spec_text(input, RPM_NAME, PREFIX);
        let d = doc(&full);
        for kind in [SectionKind::Build, SectionKind::Install] {
            let header = d.find_section(kind, 0).unwrap();
            assert_eq!(d.line(header.line + 1), Some(ENVIRONMENT_MARKER_BEGIN));
        }
        assert_eq!(count(&full, |l| l == ENVIRONMENT_MARKER_BEGIN), 2);
        assert_eq!(patch_spec_text(&full, RPM_NAME, PREFIX), full);
    }

    #[test]
    fn environment_in_all_lifecycle_sections() {
        let out = apply(TransformStep::EnvironmentBootstrap, BLOOM_CMAKE);
        assert_eq!(count(&out, |l| l == ENVIRONMENT_MARKER_BEGIN), 3);
        assert_eq!(count(&out, |l| l == ENVIRONMENT_MARKER_END), 3);
    }

    #[test]
    fn environment_terminated_header() {
        assert_eq!(
            apply(TransformStep::EnvironmentBootstrap, "%check"),
            format!("%check\n{}\n", environment_block(PREFIX).join("\n"))
        );
    }

    #[test]
    fn files_section_collapsed() {
        let out = apply(TransformStep::FilesSection, BLOOM_CMAKE);

        assert!(out.contains("%endif\n\n%files\n/opt/ros/jazzy\n%changelog\n"));
        assert_eq!(count(&out, |l| l.starts_with("%files")), 1);
    }

    #[test]
    fn files_section_without_changelog() {
        assert_eq!(
            apply(TransformStep::FilesSection, "Name: x\n\n%files\n/usr\n%files devel\n/y\n"),
            "Name: x\n\n%files\n/opt/ros/jazzy\n"
        );
    }

    #[test]
    fn files_section_inserted() {
        assert_eq!(
            apply(TransformStep::FilesSection, "Name: x\n\n%changelog\n* entry\n"),
            "Name: x\n\n%files\n/opt/ros/jazzy\n%changelog\n* entry\n"
        );
        assert_eq!(
            apply(TransformStep::FilesSection, "Name: x\n\n"),
            "Name: x\n\n%files\n/opt/ros/jazzy\n"
        );
        assert_eq!(
            apply(TransformStep::FilesSection, ""),
            "%files\n/opt/ros/jazzy\n"
        );
    }

    #[test]
    fn single_sections_after_pipeline() {
        let input = indoc! {"
            %global debug_package %{nil}
            Name: x
            %global debug_package %{nil}

            %files
            /a

            %files extra
            /b

            %changelog
        "};

        let out = patch_spec_text(input, RPM_NAME, PREFIX);

        assert_eq!(count(&out, |l| DEBUG_PACKAGE_RE.is_match(l)), 1);
        assert_eq!(count(&out, |l| section_is(l, SectionKind::Files)), 1);
        assert_eq!(count(&out, |l| l.starts_with("Name:")), 1);
        assert_eq!(count(&out, |l| l.starts_with("Source0:")), 1);
    }

    fn section_is(line: &str, kind: SectionKind) -> bool {
        crate::spec_document::section_header(line) == Some(kind)
    }

    #[test]
    fn full_cmake_patch() {
        let out = patch_spec_text(BLOOM_CMAKE, RPM_NAME, PREFIX);

        let expected_head = indoc! {"
            %bcond_without tests
            %bcond_without weak_deps

            %global debug_package %{nil}

            %global __os_install_post"};
        assert!(out.starts_with(expected_head), "{}", out);
        assert!(out.contains("Name:           ros-jazzy-foo-bar\n"));
        assert!(out.contains("Source0:        %{name}_%{version}.orig.tar.gz\n"));
        assert!(out.contains("%build\n# BEGIN ros_pythonpath\n"));
        assert!(out.contains("%install\n# BEGIN ros_pythonpath\n"));
        assert!(out.contains("%check\n# BEGIN ros_pythonpath\n"));
        assert!(out.ends_with(indoc! {"
            %files
            /opt/ros/jazzy
            %changelog
            * Mon Jan 01 2024 Jane Doe <jane@example.com> - 1.2.3-1
            - Autogenerated by Bloom
        "}));
    }
}
