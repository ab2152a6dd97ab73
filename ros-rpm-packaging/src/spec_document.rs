// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Line-oriented model of RPM spec files.

A spec file is not parsed into a syntax tree. Instead it is held as an ordered
list of lines and viewed as a sequence of regions: the *preamble* (everything
before the first section marker) followed by sections, each consisting of a
header line such as `%build` and a body extending to the next header.

Lines retain their terminators so that rendering a document that was not
modified reproduces the input byte for byte.

See <https://rpm-software-management.github.io/rpm/manual/spec.html> for the
format.
*/

use {
    once_cell::sync::Lazy,
    regex::Regex,
    std::{fmt::Display, ops::Range, str::FromStr},
    strum::{AsRefStr, EnumIter, EnumString},
};

/// A top-level section marker in a spec file.
#[derive(AsRefStr, Clone, Copy, Debug, EnumIter, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum SectionKind {
    Package,
    Description,
    Prep,
    GenerateBuildrequires,
    Conf,
    Build,
    Install,
    Check,
    Clean,
    Files,
    Changelog,
    Pre,
    Post,
    Preun,
    Postun,
    Pretrans,
    Posttrans,
    Verifyscript,
}

impl SectionKind {
    /// Sections whose bodies are shell scripts run while building the package.
    pub fn lifecycle() -> impl Iterator<Item = SectionKind> {
        [Self::Build, Self::Install, Self::Check].into_iter()
    }

    /// Whether this is a build, install or check section.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Build | Self::Install | Self::Check)
    }

    /// The marker as written in a spec file. e.g. `%build`.
    pub fn marker(&self) -> String {
        format!("%{}", self.as_ref())
    }
}

impl Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.marker())
    }
}

static SECTION_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%([A-Za-z_]+)\b").expect("static regex should compile"));

/// Classify a line as a section header, if it is one.
pub fn section_header(line: &str) -> Option<SectionKind> {
    SECTION_HEADER_RE
        .captures(line)
        .and_then(|caps| SectionKind::from_str(&caps[1]).ok())
}

/// What a region of a spec document represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegionKind {
    /// Field declarations and macro definitions before the first section.
    Preamble,
    /// A section header line.
    Header(SectionKind),
    /// The lines following a section header.
    Body(SectionKind),
}

/// A contiguous range of lines in a spec document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    pub lines: Range<usize>,
}

/// A line located by an anchor pattern.
///
/// Anchors are cheap to recompute and are never cached across mutations, since
/// any insertion or removal shifts the line indices after it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnchorMatch {
    /// Index of the matching line.
    pub line: usize,
    /// The anchor pattern that matched.
    pub anchor: String,
}

/// The text of a spec file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SpecDocument {
    /// Lines including their `\n` terminator. Only the final line may lack one.
    lines: Vec<String>,
}

impl FromStr for SpecDocument {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for SpecDocument {
    fn from(s: &str) -> Self {
        Self {
            lines: s.split_inclusive('\n').map(|l| l.to_string()).collect(),
        }
    }
}

impl Display for SpecDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            f.write_str(line)?;
        }

        Ok(())
    }
}

/// Strip the line terminator.
fn content(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

impl SpecDocument {
    /// Construct an instance from lines without terminators.
    pub fn from_lines(lines: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            lines: lines
                .into_iter()
                .map(|l| format!("{}\n", l.to_string()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// The content of a line, without its terminator.
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(|l| content(l))
    }

    /// Iterate over line contents, without terminators.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|l| content(l))
    }

    /// Replace the content of a line, preserving its terminator.
    pub fn set_line(&mut self, index: usize, value: impl AsRef<str>) {
        let line = &mut self.lines[index];
        let terminator = line[content(line).len()..].to_string();
        *line = format!("{}{}", value.as_ref(), terminator);
    }

    /// Insert lines before `index`.
    ///
    /// Inserted lines are always terminated. If inserting after an unterminated
    /// final line, that line gains a terminator.
    pub fn insert_lines(&mut self, index: usize, lines: &[impl AsRef<str>]) {
        if index > 0 && index == self.lines.len() {
            self.terminate_last();
        }

        let new = lines.iter().map(|l| format!("{}\n", l.as_ref()));
        self.lines.splice(index..index, new);
    }

    /// Replace a range of lines with new lines.
    pub fn replace_lines(&mut self, range: Range<usize>, lines: &[impl AsRef<str>]) {
        if range.start > 0 && range.start == self.lines.len() {
            self.terminate_last();
        }

        let new = lines.iter().map(|l| format!("{}\n", l.as_ref()));
        self.lines.splice(range, new);
    }

    /// Remove the line at `index`.
    pub fn remove_line(&mut self, index: usize) {
        self.lines.remove(index);
    }

    /// Append lines to the end of the document.
    pub fn push_lines(&mut self, lines: &[impl AsRef<str>]) {
        self.insert_lines(self.lines.len(), lines);
    }

    /// Remove leading lines consisting only of a line terminator.
    pub fn trim_leading_empty_lines(&mut self) {
        let count = self.lines.iter().take_while(|l| content(l).is_empty()).count();
        self.lines.drain(0..count);
    }

    /// Remove trailing lines consisting only of whitespace.
    pub fn trim_trailing_blank_lines(&mut self) {
        while self
            .lines
            .last()
            .map(|l| l.trim().is_empty())
            .unwrap_or(false)
        {
            self.lines.pop();
        }
    }

    fn terminate_last(&mut self) {
        if let Some(last) = self.lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
    }

    /// Partition the document into regions.
    ///
    /// The returned regions are contiguous and cover every line. The preamble
    /// region is always emitted first, even when empty.
    pub fn regions(&self) -> Vec<Region> {
        let mut regions = vec![];
        let mut current = RegionKind::Preamble;
        let mut start = 0;

        for (i, line) in self.iter_lines().enumerate() {
            if let Some(kind) = section_header(line) {
                regions.push(Region {
                    kind: current,
                    lines: start..i,
                });
                regions.push(Region {
                    kind: RegionKind::Header(kind),
                    lines: i..i + 1,
                });
                current = RegionKind::Body(kind);
                start = i + 1;
            }
        }

        regions.push(Region {
            kind: current,
            lines: start..self.lines.len(),
        });

        regions
    }

    /// Lines before the first section header.
    pub fn preamble(&self) -> Range<usize> {
        let end = self
            .iter_lines()
            .position(|l| section_header(l).is_some())
            .unwrap_or(self.lines.len());

        0..end
    }

    /// Indices of lines inside the bodies of sections matching a predicate.
    pub fn section_body_lines(&self, predicate: impl Fn(SectionKind) -> bool) -> Vec<usize> {
        self.regions()
            .into_iter()
            .filter_map(|region| match region.kind {
                RegionKind::Body(kind) if predicate(kind) => Some(region.lines),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Find the first header line of a section kind, at or after `from`.
    pub fn find_section(&self, kind: SectionKind, from: usize) -> Option<AnchorMatch> {
        self.iter_lines()
            .enumerate()
            .skip(from)
            .find(|(_, line)| section_header(line) == Some(kind))
            .map(|(line, _)| AnchorMatch {
                line,
                anchor: kind.marker(),
            })
    }

    /// Find all lines in `range` matching a regular expression.
    pub fn find_all_in(&self, re: &Regex, range: Range<usize>) -> Vec<AnchorMatch> {
        self.iter_lines()
            .enumerate()
            .skip(range.start)
            .take(range.end.saturating_sub(range.start))
            .filter(|(_, line)| re.is_match(line))
            .map(|(line, _)| AnchorMatch {
                line,
                anchor: re.as_str().to_string(),
            })
            .collect()
    }

    /// Find the first line anywhere in the document matching a regular expression.
    pub fn find_first(&self, re: &Regex) -> Option<AnchorMatch> {
        self.find_all_in(re, 0..self.lines.len()).into_iter().next()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}
