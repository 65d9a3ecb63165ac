// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;

use anyhow::Result;
use regex::{Regex, RegexSet};

/// Include/exclude rules over dotted class names, e.g. `com.example.Foo`.
///
/// Patterns support `*` (any sequence) and `?` (any single character).
#[derive(Clone, Debug)]
pub struct ClassFilter {
    include: RegexSet,
    exclude: RegexSet,
}

impl ClassFilter {
    /// Build a filter from `:`-separated pattern lists.
    ///
    /// An empty `include` list includes every class.
    pub fn new(include: &str, exclude: &str) -> Result<Self> {
        let include = if include.trim().is_empty() {
            RegexSet::new([".*"])?
        } else {
            pattern_set(include)?
        };

        let exclude = pattern_set(exclude)?;

        Ok(Self { include, exclude })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse an allowlist: one pattern per line, `# ` comments and `! ` exclusions.
    pub fn parse(text: &str) -> Result<Self> {
        let mut include = vec![];
        let mut exclude = vec![];

        for (index, line) in text.lines().enumerate() {
            match FilterLine::parse(line) {
                Ok(FilterLine::Blank | FilterLine::Comment) => {}
                Ok(FilterLine::Include(re)) => include.push(re),
                Ok(FilterLine::Exclude(re)) => exclude.push(re),
                Err(err) => {
                    // Ignore invalid lines, but warn.
                    warn!("error at line {}: {}", index + 1, err);
                }
            }
        }

        let include = RegexSet::new(include.iter().map(|re| re.as_str()))?;
        let exclude = RegexSet::new(exclude.iter().map(|re| re.as_str()))?;

        Ok(Self { include, exclude })
    }

    /// `name` may be in VM (`com/example/Foo`) or dotted form.
    pub fn is_included(&self, name: impl AsRef<str>) -> bool {
        let name = name.as_ref().replace('/', ".");

        self.include.is_match(&name) && !self.exclude.is_match(&name)
    }

    /// Add the rules of `other` to `self`.
    pub fn extend(&mut self, other: &Self) {
        self.include = add_regexsets(&self.include, &other.include);
        self.exclude = add_regexsets(&self.exclude, &other.exclude);
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        // Unwrap-safe due to valid constant expr.
        let include = RegexSet::new([".*"]).unwrap();
        let exclude = RegexSet::empty();

        Self { include, exclude }
    }
}

fn pattern_set(patterns: &str) -> Result<RegexSet> {
    let regexes = patterns
        .split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(wildcard_to_regex)
        .collect::<Result<Vec<_>>>()?;

    Ok(RegexSet::new(regexes.iter().map(|re| re.as_str()))?)
}

fn add_regexsets(lhs: &RegexSet, rhs: &RegexSet) -> RegexSet {
    let mut patterns = lhs.patterns().to_vec();
    patterns.extend(rhs.patterns().iter().cloned());

    // Can't panic: patterns were accepted by input `RegexSet` ctors.
    RegexSet::new(patterns).unwrap()
}

enum FilterLine {
    Blank,
    Comment,
    Include(Regex),
    Exclude(Regex),
}

impl FilterLine {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();

        if line.is_empty() {
            return Ok(Self::Blank);
        }

        if line.starts_with("# ") {
            return Ok(Self::Comment);
        }

        if let Some(expr) = line.strip_prefix("! ") {
            return Ok(Self::Exclude(wildcard_to_regex(expr)?));
        }

        Ok(Self::Include(wildcard_to_regex(line)?))
    }
}

fn wildcard_to_regex(expr: &str) -> Result<Regex> {
    let expr = regex::escape(&expr.replace('/', "."));

    // Translate escaped wildcards into quantified regexes.
    let expr = expr.replace(r"\*", ".*").replace(r"\?", ".");

    Ok(Regex::new(&format!("^{expr}$"))?)
}
