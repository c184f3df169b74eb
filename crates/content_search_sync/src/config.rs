//! Runtime configuration: CLI flags that fall back to environment variables,
//! grounded in `fivetran_common::config::Config::from_parameters`'s eager
//! validation but laid out with `clap::Parser`'s `env` attribute rather than
//! a hand-rolled `BTreeMap<String, String>` lookup, since this binary runs
//! as an ordinary process rather than behind a gRPC form.

use clap::Parser;

/// Command-line flags, each overridable by the environment variable of the
/// same name, matching the source system's `settings.py` names so existing
/// deployments can reuse their env files unchanged.
#[derive(Debug, Parser)]
#[command(name = "content-search-sync", about = "Syncs films, genres and persons into a search index")]
pub struct Config {
    #[arg(long, env = "POSTGRES_HOST", default_value = "127.0.0.1")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_NAME")]
    pub postgres_name: String,

    #[arg(long, env = "POSTGRES_USER")]
    pub postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: String,

    #[arg(long, env = "ELASTIC_HOST", default_value = "127.0.0.1")]
    pub elastic_host: String,

    #[arg(long, env = "ELASTIC_PORT", default_value_t = 9200)]
    pub elastic_port: u16,

    /// Path to the watermark checkpoint file.
    #[arg(long, env = "STATE_FILE", default_value = "./state.json")]
    pub state_file: String,

    /// Seconds to sleep between passes once a pass finds nothing left to do.
    #[arg(long, env = "ETL_TIMEOUT", default_value_t = 60)]
    pub etl_timeout: u64,

    /// Rows pulled per server-side cursor fetch.
    #[arg(long, env = "FETCH_SIZE", default_value_t = 100)]
    pub fetch_size: u32,

    /// Ids grouped per source-side id bunch.
    #[arg(long, env = "BUNCH_SIZE", default_value_t = 100)]
    pub bunch_size: usize,

    /// Documents grouped per sink bulk-upsert request.
    #[arg(long, env = "SINK_BATCH_SIZE", default_value_t = 100)]
    pub sink_batch_size: usize,
}

impl Config {
    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            dbname: self.postgres_name.clone(),
            user: self.postgres_user.clone(),
            password: self.postgres_password.clone(),
        }
    }

    pub fn elastic_base_url(&self) -> String {
        format!("http://{}:{}", self.elastic_host, self.elastic_port)
    }
}

/// The subset of [`Config`] the Postgres source needs, split out so
/// `source::postgres` doesn't depend on the CLI-parsing half of this module.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl PostgresConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.dbname, self.user, self.password
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_flags_with_env_defaults() {
        let config = Config::parse_from([
            "content-search-sync",
            "--postgres-name",
            "movies",
            "--postgres-user",
            "app",
            "--postgres-password",
            "secret",
        ]);
        assert_eq!(config.postgres_host, "127.0.0.1");
        assert_eq!(config.postgres_port, 5432);
        assert_eq!(config.etl_timeout, 60);
        assert_eq!(config.fetch_size, 100);
        assert_eq!(config.bunch_size, 100);
        assert_eq!(config.sink_batch_size, 100);
    }

    #[test]
    fn builds_a_libpq_style_connection_string() {
        let config = Config::parse_from([
            "content-search-sync",
            "--postgres-host",
            "db.internal",
            "--postgres-port",
            "5433",
            "--postgres-name",
            "movies",
            "--postgres-user",
            "app",
            "--postgres-password",
            "secret",
        ]);
        assert_eq!(
            config.postgres().connection_string(),
            "host=db.internal port=5433 dbname=movies user=app password=secret"
        );
    }

    #[test]
    fn builds_the_elastic_base_url() {
        let config = Config::parse_from([
            "content-search-sync",
            "--postgres-name",
            "movies",
            "--postgres-user",
            "app",
            "--postgres-password",
            "secret",
            "--elastic-host",
            "es.internal",
            "--elastic-port",
            "9201",
        ]);
        assert_eq!(config.elastic_base_url(), "http://es.internal:9201");
    }

    #[test]
    fn rejects_missing_required_flags() {
        let result = Config::try_parse_from(["content-search-sync"]);
        assert!(result.is_err());
    }
}
