//! The `format` metadata tag stored alongside every value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared content format of a stored value. Purely advisory — the
/// engine never parses or validates the value against its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Text,
    Json,
    Yaml,
    Xml,
    Toml,
    Ini,
    Hcl,
    Shell,
}

impl Default for Format {
    fn default() -> Self {
        Self::Text
    }
}

impl Format {
    /// Coerce an empty or unrecognized format string to `text`.
    pub fn parse_or_default(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Xml => "xml",
            Self::Toml => "toml",
            Self::Ini => "ini",
            Self::Hcl => "hcl",
            Self::Shell => "shell",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            "xml" => Ok(Self::Xml),
            "toml" => Ok(Self::Toml),
            "ini" => Ok(Self::Ini),
            "hcl" => Ok(Self::Hcl),
            "shell" => Ok(Self::Shell),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_unknown_coerces_to_text() {
        assert_eq!(Format::parse_or_default(""), Format::Text);
        assert_eq!(Format::parse_or_default("bogus"), Format::Text);
    }

    #[test]
    fn round_trips_known_formats() {
        for f in [
            Format::Text,
            Format::Json,
            Format::Yaml,
            Format::Xml,
            Format::Toml,
            Format::Ini,
            Format::Hcl,
            Format::Shell,
        ] {
            assert_eq!(Format::parse_or_default(f.as_str()), f);
        }
    }
}
