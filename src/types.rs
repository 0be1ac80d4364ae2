use serde::{Deserialize, Serialize};

/// How the destination tree is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationScheme {
    /// `<dest>/<ext>/YYYY/YYYY-MM/YYYY-MM-DD/<file>`
    #[default]
    #[value(name = "extension_first")]
    ExtensionFirst,
    /// `<dest>/YYYY/YYYY-MM/YYYY-MM-DD/<ext>/<file>`
    #[value(name = "date_first")]
    DateFirst,
}

impl OrganizationScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtensionFirst => "extension_first",
            Self::DateFirst => "date_first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}
