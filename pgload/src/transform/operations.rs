//! Cleanup operations applied to raw column text before type coercion.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All available cleanup operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Remove leading and trailing whitespace
    Trim,

    /// Convert to uppercase
    Uppercase,

    /// Convert to lowercase
    Lowercase,

    /// Replace using regex pattern
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
        #[serde(skip)]
        compiled: OnceCell<Regex>,
    },

    /// Pad string at start to reach target length
    PadStart {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// Pad string at end to reach target length
    PadEnd {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// Ensure string starts with given prefix
    EnsurePrefix { value: String },

    /// Ensure string ends with given suffix
    EnsureSuffix { value: String },

    /// Map values using a lookup table
    Map {
        mapping: HashMap<String, String>,
        #[serde(default)]
        case_insensitive: bool,
        /// Value to use when no key matches (unmatched values pass through when unset)
        #[serde(default)]
        default_unmapped: Option<String>,
    },

    /// Take `length` characters starting at `start`
    Substring {
        start: usize,
        #[serde(default)]
        length: Option<usize>,
    },

    /// Remove every character listed in `chars`
    Remove { chars: String },

    /// Remove all non-alphanumeric characters
    Alphanumeric,

    /// Remove all non-digit characters
    DigitsOnly,
}

fn default_pad_char() -> String {
    "0".to_string()
}

impl Operation {
    /// Build a regex replacement.
    pub fn replace(pattern: impl Into<String>, value: impl Into<String>) -> Self {
        Operation::Replace {
            pattern: pattern.into(),
            value: value.into(),
            compiled: OnceCell::new(),
        }
    }

    /// Check parameters that can only be verified at runtime.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Operation::Replace { pattern, compiled, .. } => compiled
                .get_or_try_init(|| Regex::new(pattern))
                .map(|_| ())
                .map_err(|e| format!("invalid replace pattern '{}': {}", pattern, e)),
            Operation::PadStart { char, .. } | Operation::PadEnd { char, .. }
                if char.chars().count() != 1 =>
            {
                Err(format!("pad char must be a single character, got '{}'", char))
            }
            _ => Ok(()),
        }
    }

    /// Apply this operation to a value
    pub fn apply(&self, value: &str) -> String {
        match self {
            Operation::Trim => value.trim().to_string(),
            Operation::Uppercase => value.to_uppercase(),
            Operation::Lowercase => value.to_lowercase(),
            Operation::Replace { pattern, value: replacement, compiled } => {
                self.apply_replace(value, pattern, replacement, compiled)
            }
            Operation::PadStart { length, char } => Self::pad(value, *length, char, true),
            Operation::PadEnd { length, char } => Self::pad(value, *length, char, false),
            Operation::EnsurePrefix { value: prefix } => {
                if value.starts_with(prefix.as_str()) {
                    value.to_string()
                } else {
                    format!("{}{}", prefix, value)
                }
            }
            Operation::EnsureSuffix { value: suffix } => {
                if value.ends_with(suffix.as_str()) {
                    value.to_string()
                } else {
                    format!("{}{}", value, suffix)
                }
            }
            Operation::Map { mapping, case_insensitive, default_unmapped } => {
                self.apply_map(value, mapping, *case_insensitive, default_unmapped.as_deref())
            }
            Operation::Substring { start, length } => {
                let chars = value.chars().skip(*start);
                match length {
                    Some(l) => chars.take(*l).collect(),
                    None => chars.collect(),
                }
            }
            Operation::Remove { chars } => value.chars().filter(|c| !chars.contains(*c)).collect(),
            Operation::Alphanumeric => value.chars().filter(|c| c.is_alphanumeric()).collect(),
            Operation::DigitsOnly => value.chars().filter(|c| c.is_ascii_digit()).collect(),
        }
    }

    fn apply_replace(
        &self,
        value: &str,
        pattern: &str,
        replacement: &str,
        compiled: &OnceCell<Regex>,
    ) -> String {
        match compiled.get_or_try_init(|| Regex::new(pattern)) {
            Ok(re) => re.replace_all(value, replacement).into_owned(),
            Err(_) => value.to_string(),
        }
    }

    fn pad(value: &str, length: usize, pad_char: &str, at_start: bool) -> String {
        let current = value.chars().count();
        if current >= length {
            return value.to_string();
        }
        let pad = pad_char.chars().next().unwrap_or('0');
        let padding: String = std::iter::repeat_n(pad, length - current).collect();
        if at_start {
            format!("{}{}", padding, value)
        } else {
            format!("{}{}", value, padding)
        }
    }

    fn apply_map(
        &self,
        value: &str,
        mapping: &HashMap<String, String>,
        case_insensitive: bool,
        default_unmapped: Option<&str>,
    ) -> String {
        let found = if case_insensitive {
            let key = value.to_lowercase();
            mapping.iter().find(|(k, _)| k.to_lowercase() == key)
        } else {
            mapping.get_key_value(value)
        };

        match (found, default_unmapped) {
            (Some((_, v)), _) => v.clone(),
            (None, Some(d)) => d.to_string(),
            (None, None) => value.to_string(),
        }
    }
}
