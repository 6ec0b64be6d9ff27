/*!
Runtime configuration.

Every workspace starts from [`Cfg::default`]; a `colleged.toml` in the
workspace directory overrides individual keys.
*/
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "colleged.toml";

#[derive(Deserialize)]
struct ConfigFile {
    admin_email: Option<String>,
    admin_password: Option<String>,
    admin_name: Option<String>,
    session_ttl_hours: Option<i64>,
    max_semester: Option<i64>,
    bulk_max_entries: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub default_admin_email: String,
    pub default_admin_password: String,
    pub default_admin_name: String,
    pub session_ttl_hours: i64,
    pub max_semester: i64,
    pub bulk_max_entries: usize,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            default_admin_email: "admin@college.local".to_owned(),
            default_admin_password: "admin123".to_owned(),
            default_admin_name: "Administrator".to_owned(),
            session_ttl_hours: 12,
            max_semester: 8,
            bulk_max_entries: 5000,
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("unable to deserialize config file {}", path.display()))
    }

    fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cf: ConfigFile = toml::from_str(contents)?;
        let mut c = Self::default();

        if let Some(s) = cf.admin_email {
            c.default_admin_email = s.trim().to_ascii_lowercase();
        }
        if let Some(s) = cf.admin_password {
            c.default_admin_password = s;
        }
        if let Some(s) = cf.admin_name {
            c.default_admin_name = s;
        }
        if let Some(n) = cf.session_ttl_hours {
            anyhow::ensure!(n > 0, "session_ttl_hours must be > 0");
            c.session_ttl_hours = n;
        }
        if let Some(n) = cf.max_semester {
            anyhow::ensure!(n >= 1, "max_semester must be >= 1");
            c.max_semester = n;
        }
        if let Some(n) = cf.bulk_max_entries {
            anyhow::ensure!(n >= 1, "bulk_max_entries must be >= 1");
            c.bulk_max_entries = n;
        }

        Ok(c)
    }

    /// Defaults when the workspace has no config file.
    pub fn for_workspace(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(CONFIG_FILE);
        if path.is_file() {
            let cfg = Self::from_file(&path)?;
            log::info!("configuration read from {}", path.display());
            Ok(cfg)
        } else {
            Ok(Self::default())
        }
    }
}

pub fn log_level_from_env() -> simplelog::LevelFilter {
    use simplelog::LevelFilter;

    let mut level_string = match std::env::var("LOG_LEVEL") {
        Err(_) => return LevelFilter::Warn,
        Ok(s) => s,
    };

    level_string.make_ascii_lowercase();
    match level_string.as_str() {
        "max" => LevelFilter::max(),
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}
