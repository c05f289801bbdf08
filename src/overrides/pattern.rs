// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Override pattern matching.

use glob::{MatchOptions, Pattern};

use crate::error::OverrideError;

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled override pattern.
///
/// Patterns are shell-style globs (`*`, `?`, `[...]`) matched
/// case-insensitively against device paths, with an implicit trailing `*`:
/// a pattern selects every device whose path starts with it.
///
/// # Examples
///
/// ```
/// use platform_driver::overrides::OverridePattern;
///
/// let pattern = OverridePattern::new("campus/building1/*").unwrap();
/// assert!(pattern.matches("campus/building1/device1"));
/// assert!(pattern.matches("Campus/Building1/AHU/fan"));
/// assert!(!pattern.matches("campus/building2/device1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverridePattern {
    source: String,
    compiled: Pattern,
}

impl OverridePattern {
    /// Compiles a pattern.
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::InvalidPattern`] if the pattern is empty or
    /// not a valid glob.
    pub fn new(pattern: &str) -> Result<Self, OverrideError> {
        let source = pattern.trim().to_string();
        if source.is_empty() {
            return Err(OverrideError::InvalidPattern {
                pattern: source,
                message: "pattern is empty".to_string(),
            });
        }

        let compiled =
            Pattern::new(&format!("{source}*")).map_err(|e| OverrideError::InvalidPattern {
                pattern: source.clone(),
                message: e.msg.to_string(),
            })?;

        Ok(Self { source, compiled })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if the device at `path` is selected.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.compiled.matches_with(path, OPTIONS)
    }
}
