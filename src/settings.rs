use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub database: Database,
    pub auth: Auth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// Path of the JSON database file. Relative paths are resolved against
    /// the current directory at load time.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    /// Credential lifetime in days; `expire_at` is always issuance time
    /// plus this duration.
    pub token_validity_days: i64,
    /// Realm reported to clients on login.
    pub realm: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8007,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/dustbox.json"),
        }
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            token_validity_days: 30,
            realm: "ecouser.net".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "database.path",
                Database::default().path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default(
                "auth.token_validity_days",
                Auth::default().token_validity_days,
            )
            .into_diagnostic()?
            .set_default("auth.realm", Auth::default().realm)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: DUSTBOX__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("DUSTBOX").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize the database path to be relative to current dir
        if s.database.path.is_relative() {
            s.database.path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.database.path);
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
