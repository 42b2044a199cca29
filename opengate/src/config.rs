//! Daemon runtime configuration, read from the environment.
//!
//! | Variable                | Meaning                                    | Default                       |
//! |-------------------------|--------------------------------------------|-------------------------------|
//! | `OPENGATE_SETTINGS`     | Settings document path                     | `$XDG_CONFIG_HOME/opengate/settings.json` |
//! | `OPENGATE_FIXES`        | File of `lat,lon` lines to replay          | stdin                         |
//! | `OPENGATE_SAMPLING_MS`  | Fix interval in milliseconds               | 10000                         |
//! | `OPENGATE_DIAL_COMMAND` | Direct-dial program, number appended       | none (prompt only)            |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::position::SamplingRequest;

pub const SETTINGS_VAR: &str = "OPENGATE_SETTINGS";
pub const FIXES_VAR: &str = "OPENGATE_FIXES";
pub const SAMPLING_VAR: &str = "OPENGATE_SAMPLING_MS";
pub const DIAL_COMMAND_VAR: &str = "OPENGATE_DIAL_COMMAND";

const SETTINGS_RELATIVE: &str = "opengate/settings.json";
const SETTINGS_FALLBACK: &str = "opengate-settings.json";

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub settings_path: PathBuf,

    /// Replay fixes from this file instead of stdin.
    pub fixes_path: Option<PathBuf>,

    pub sampling: SamplingRequest,

    /// Direct-dial command line. The prompt is the only strategy without it.
    pub dial_command: Option<String>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let settings_path = match get(SETTINGS_VAR) {
            Some(path) => PathBuf::from(path),
            None => default_settings_path(get("XDG_CONFIG_HOME"), get("HOME")),
        };

        let sampling = match get(SAMPLING_VAR) {
            Some(raw) => parse_sampling(&raw)?,
            None => SamplingRequest::default(),
        };

        Ok(Self {
            settings_path,
            fixes_path: get(FIXES_VAR).map(PathBuf::from),
            sampling,
            dial_command: get(DIAL_COMMAND_VAR),
        })
    }
}

fn default_settings_path(xdg_config_home: Option<String>, home: Option<String>) -> PathBuf {
    match (xdg_config_home, home) {
        (Some(config), _) => PathBuf::from(config).join(SETTINGS_RELATIVE),
        (None, Some(home)) => PathBuf::from(home).join(".config").join(SETTINGS_RELATIVE),
        (None, None) => PathBuf::from(SETTINGS_FALLBACK),
    }
}

/// Interval in milliseconds. Fixes may arrive up to twice as fast.
fn parse_sampling(raw: &str) -> Result<SamplingRequest> {
    let millis: u64 = raw
        .parse()
        .map_err(|_| Error::Config(format!("{SAMPLING_VAR}: not a number: {raw:?}")))?;
    if millis == 0 {
        return Err(Error::Config(format!("{SAMPLING_VAR} must be positive")));
    }

    let interval = Duration::from_millis(millis);
    Ok(SamplingRequest {
        interval,
        fastest_interval: interval / 2,
    })
}
