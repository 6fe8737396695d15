//! Seed-range and ignore-list input files
//!
//! Both formats are line oriented. A seed line reads
//! `FunctionName|ValueName|[L, U]` where `L` and `U` are decimal literals
//! or `-inf`/`+inf`. An ignore-list file holds one function name per
//! line. Malformed lines are dropped with a warning; the files are a
//! best-effort feature, not a correctness dependency.

use {
    crate::range::Range,
    log::warn,
    std::{
        collections::{HashMap, HashSet},
        fs, io,
        path::Path,
    },
    thiserror::Error,
};

/// Failures while loading analysis input files
#[derive(Debug, Error)]
pub enum SeedError {
    /// The file itself could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path
        path: String,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },
}

/// Classification of one seed-file line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedLine {
    /// A well-formed `function|value|range` entry
    Entry(String, String, Range),
    /// Blank line or `#` comment, skipped without notice
    Skip,
    /// Anything else, dropped with a warning
    Malformed,
}

/// Parses one seed line into `(function, value name, range)`
pub fn parse_seed_line(line: &str) -> SeedLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return SeedLine::Skip;
    }
    let mut fields = line.splitn(3, '|');
    let entry = (|| {
        let function = fields.next()?.trim();
        let value = fields.next()?.trim();
        let range_text = fields.next()?.trim();
        if function.is_empty() || value.is_empty() {
            return None;
        }
        let range: Range = range_text.parse().ok()?;
        Some((function.to_string(), value.to_string(), range))
    })();
    match entry {
        Some((function, value, range)) => SeedLine::Entry(function, value, range),
        None => SeedLine::Malformed,
    }
}

/// Loads a seed file into a map keyed by `(function, value name)`
pub fn load_seed_file(path: &Path) -> Result<HashMap<(String, String), Range>, SeedError> {
    let text = fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut seeds = HashMap::new();
    for (number, line) in text.lines().enumerate() {
        match parse_seed_line(line) {
            SeedLine::Entry(function, value, range) => {
                seeds.insert((function, value), range);
            }
            SeedLine::Skip => {}
            SeedLine::Malformed => warn!(
                "{}:{}: skipping malformed seed line {:?}",
                path.display(),
                number + 1,
                line
            ),
        }
    }
    Ok(seeds)
}

/// Loads an ignore-list file into a set of function names
pub fn load_ignored_functions(path: &Path) -> Result<HashSet<String>, SeedError> {
    let text = fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
