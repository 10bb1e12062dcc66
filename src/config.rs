//! Runtime configuration.
//!
//! Every setting is a CLI flag with an environment-variable fallback, so a
//! `.env` file (loaded by `dotenvy` before parsing) is enough to point the
//! tool at a different store.

use anyhow::Context;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::StoreConfig;

pub const DEFAULT_LOG_FILE: &str = "logs/readmission_insights.log";

/// Where patient-visit records are read from.
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Document store connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017/")]
    pub mongodb_uri: String,

    /// Database holding the patient-visit collection
    #[arg(long, env = "MONGODB_DATABASE", default_value = "diabetes_project")]
    pub database: String,

    /// Patient-visit collection name
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "patient_data")]
    pub collection: String,

    /// Give up on the store after this many milliseconds
    #[arg(long, env = "MONGODB_TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Read records from a dataset CSV instead of the document store
    #[arg(long, value_name = "PATH")]
    pub csv: Option<PathBuf>,
}

impl SourceArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            uri: self.mongodb_uri.clone(),
            database: self.database.clone(),
            collection: self.collection.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "DASHBOARD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "DASHBOARD_PORT", default_value_t = 5000)]
    pub port: u16,
}

impl ServeArgs {
    /// Resolves `host` (a name or an IP literal) to the first bindable address.
    pub async fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("resolve {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("no address for {}", self.host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        serve: ServeArgs,
    }

    #[tokio::test]
    async fn test_flags_override_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--mongodb-uri",
            "mongodb://db.internal:27017/",
            "--timeout-ms",
            "250",
            "--port",
            "8080",
        ]);
        let store = cli.source.store_config();
        assert_eq!(store.uri, "mongodb://db.internal:27017/");
        assert_eq!(store.timeout, Duration::from_millis(250));
        assert_eq!(cli.serve.socket_addr().await.unwrap().port(), 8080);
    }

    #[tokio::test]
    async fn test_hostname_resolves() {
        let serve = ServeArgs {
            host: "localhost".into(),
            port: 5000,
        };
        let addr = serve.socket_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 5000);
    }

    #[tokio::test]
    async fn test_ip_literal_is_used_as_is() {
        let serve = ServeArgs {
            host: "127.0.0.1".into(),
            port: 8081,
        };
        assert_eq!(
            serve.socket_addr().await.unwrap(),
            "127.0.0.1:8081".parse::<SocketAddr>().unwrap()
        );
    }
}
