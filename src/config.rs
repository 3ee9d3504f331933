use core::fmt;
use std::env;

/// Which OSM instance the run targets. Dev talks to the sandbox API, caches
/// vendor responses, and skips the initial warning prompt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Mode {
    pub fn from_env() -> Self {
        match env::var("ENV").as_deref() {
            Ok("dev") => Self::Dev,
            _ => Self::Prod,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }

    pub fn api_base_url(&self) -> &'static str {
        match self {
            Self::Dev => "https://master.apis.dev.openstreetmap.org",
            Self::Prod => "https://www.openstreetmap.org",
        }
    }

    pub fn use_cache(&self) -> bool {
        matches!(self, Self::Dev)
    }
}
