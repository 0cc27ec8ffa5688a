use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, VexError};

// major[.minor[.patch]] with an optional "revision <token>)" tail, as printed by
// `varnishstat -V`, e.g. "varnishstat (varnish-4.1.0 revision 3041728)".
static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:.*revision\s(.*)\))?")
        .expect("version pattern is valid")
});

/// Product version of the varnishstat binary.
///
/// Absent numeric components are `-1`, not zero: "4" and "4.0" are different
/// versions as far as feature toggles are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarnishVersion {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
    pub revision: String,
}

impl VarnishVersion {
    pub fn unresolved() -> Self {
        Self {
            major: -1,
            minor: -1,
            patch: -1,
            revision: String::new(),
        }
    }

    pub fn new(major: i32, minor: i32, patch: i32) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: String::new(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let captures = VERSION_PATTERN
            .captures(line)
            .ok_or_else(|| VexError::VersionResolution(line.to_string()))?;

        let number = |index: usize| -> Result<i32> {
            match captures.get(index) {
                Some(found) => found
                    .as_str()
                    .parse::<i32>()
                    .map_err(|_| VexError::VersionResolution(line.to_string())),
                None => Ok(-1),
            }
        };

        let version = Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            revision: captures
                .get(4)
                .map(|found| found.as_str().trim().to_string())
                .unwrap_or_default(),
        };

        if !version.is_resolved() {
            return Err(VexError::VersionResolution(line.to_string()));
        }
        Ok(version)
    }

    pub fn is_resolved(&self) -> bool {
        self.major != -1
    }

    /// True iff this version is `major.minor` or newer. An unresolved version
    /// fails every comparison and so behaves like the oldest known generation.
    pub fn is_at_least(&self, major: i32, minor: i32) -> bool {
        if !self.is_resolved() {
            return false;
        }
        self.major > major || (self.major == major && self.minor >= minor)
    }

    /// Dotted numeric version without the revision, e.g. "4.1.0".
    pub fn version_string(&self) -> String {
        [self.major, self.minor, self.patch]
            .iter()
            .filter(|part| **part != -1)
            .map(|part| part.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Label pairs in a fixed order; unknown components are left out.
    pub fn labels(&self) -> Vec<(String, String)> {
        let mut labels = Vec::with_capacity(5);
        for (key, value) in [
            ("major", self.major),
            ("minor", self.minor),
            ("patch", self.patch),
        ] {
            if value != -1 {
                labels.push((key.to_string(), value.to_string()));
            }
        }
        if !self.revision.is_empty() {
            labels.push(("revision".to_string(), self.revision.clone()));
        }
        labels.push(("version".to_string(), self.version_string()));
        labels
    }
}

impl Default for VarnishVersion {
    fn default() -> Self {
        Self::unresolved()
    }
}

impl fmt::Display for VarnishVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.version_string())?;
        if !self.revision.is_empty() {
            write!(f, " {}", self.revision)?;
        }
        Ok(())
    }
}
