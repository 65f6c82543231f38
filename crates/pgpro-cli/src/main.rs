use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "pgpro", version, about = "pg_pro PostgreSQL proxy")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy in the configured mode.
    Serve {
        /// Config file. Searched in /etc/pg_pro, ~/.pg_pro and . when omitted.
        #[arg(long, short = 'c', env = "PGPRO_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Run as a pure TCP proxy onto the primary, whatever the configured mode.
    Splice {
        #[arg(long, short = 'c', env = "PGPRO_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Validate the config file and the users file it points to.
    Check {
        #[arg(long, short = 'c', env = "PGPRO_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Query cache maintenance.
    Cache {
        #[command(subcommand)]
        cmd: CacheCommand,
    },

    /// Print an MD5 password value for the users file or for a challenge.
    Hash {
        #[arg(long)]
        user: String,

        #[arg(long)]
        password: String,

        /// Four byte salt as hex (e.g. 31323334). Without it the stored form
        /// is printed.
        #[arg(long)]
        salt: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Remove every cached result from the configured backend.
    Clear {
        #[arg(long, short = 'c', env = "PGPRO_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.cmd {
        Command::Serve { config } => commands::serve::serve(config.as_deref(), false).await?,
        Command::Splice { config } => commands::serve::serve(config.as_deref(), true).await?,
        Command::Check { config } => commands::check::run(config.as_deref())?,
        Command::Cache {
            cmd: CacheCommand::Clear { config },
        } => commands::cache::clear(config.as_deref()).await?,
        Command::Hash {
            user,
            password,
            salt,
        } => println!("{}", commands::hash::hash(&user, &password, salt.as_deref())?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_log_format() {
        let cli = Cli::try_parse_from(["pgpro", "check", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.cmd, Command::Check { config: None }));
    }

    #[test]
    fn test_cache_clear_args() {
        let cli = Cli::try_parse_from(["pgpro", "cache", "clear", "-c", "/tmp/pg.yaml"]).unwrap();
        match cli.cmd {
            Command::Cache {
                cmd: CacheCommand::Clear { config },
            } => assert_eq!(config, Some(PathBuf::from("/tmp/pg.yaml"))),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
