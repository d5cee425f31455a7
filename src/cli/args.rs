//! Command line argument parsing
//!
//! Subcommands:
//! - `show-config`: Print the merged configuration with secrets masked
//! - `check-providers`: Health check every configured LLM provider
//! - `test-provider`: Exercise one provider type with the configured settings
//! - `generate`: Structured generation through the failover client
//! - `watch`: Hot-reload the configuration file until interrupted
//! - `set`: Persist a runtime override in the configuration database

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::manager::DEFAULT_WATCH_INTERVAL;
use crate::config::merge::parse_stored_value;

#[derive(Debug)]
pub enum ExecutionMode {
    ShowConfig { config: Option<PathBuf>, json: bool },
    CheckProviders { config: Option<PathBuf> },
    TestProvider(TestProviderConfig),
    Generate { prompt: String, config: Option<PathBuf> },
    Watch { config: Option<PathBuf>, interval: Duration },
    Set(SetConfig),
}

#[derive(Debug)]
pub struct TestProviderConfig {
    pub provider_id: String,
    pub discover: bool,
    pub config: Option<PathBuf>,
}

#[derive(Debug)]
pub struct SetConfig {
    pub key: String,
    pub value: Value,
    pub database_url: Option<String>,
    pub restart_containers: bool,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "docaiche")]
#[command(author = "DocAIche Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "DocAIche configuration and LLM provider tooling")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the merged configuration with secrets masked
    ShowConfig {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Print JSON instead of YAML
        #[arg(long = "json")]
        json: bool,
    },
    /// Check the health of every configured provider
    CheckProviders {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Test a single provider type
    TestProvider {
        /// Provider id (ollama, openai, anthropic, openrouter, lmstudio)
        provider_id: String,
        /// Also list the provider's models
        #[arg(long = "discover")]
        discover: bool,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Generate a structured `{"text": ...}` response
    Generate {
        /// Prompt text
        prompt: String,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Reload the configuration whenever the file changes
    Watch {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Polling interval in seconds
        #[arg(short = 'i', long = "interval", default_value_t = DEFAULT_WATCH_INTERVAL.as_secs())]
        interval: u64,
    },
    /// Store a configuration override in the database
    Set {
        /// Dotted configuration key, e.g. ai.primary_provider
        key: String,
        /// Value; parsed as JSON when possible, else taken as a string
        value: String,
        /// Database URL, e.g. sqlite://docaiche.db; defaults to DOCAICHE_DATABASE_URL
        #[arg(long = "database")]
        database: Option<String>,
        /// Restart affected service containers after the change
        #[arg(long = "restart-containers")]
        restart_containers: bool,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::ShowConfig { config, json }) => Ok(ExecutionMode::ShowConfig {
                config: config.clone(),
                json: *json,
            }),
            Some(Commands::CheckProviders { config }) => Ok(ExecutionMode::CheckProviders {
                config: config.clone(),
            }),
            Some(Commands::TestProvider {
                provider_id,
                discover,
                config,
            }) => Ok(ExecutionMode::TestProvider(TestProviderConfig {
                provider_id: provider_id.to_ascii_lowercase(),
                discover: *discover,
                config: config.clone(),
            })),
            Some(Commands::Generate { prompt, config }) => {
                if prompt.trim().is_empty() {
                    return Err("Prompt must not be empty".to_string());
                }
                Ok(ExecutionMode::Generate {
                    prompt: prompt.clone(),
                    config: config.clone(),
                })
            }
            Some(Commands::Watch { config, interval }) => {
                if *interval == 0 {
                    return Err("Watch interval must be at least one second".to_string());
                }
                Ok(ExecutionMode::Watch {
                    config: config.clone(),
                    interval: Duration::from_secs(*interval),
                })
            }
            Some(Commands::Set {
                key,
                value,
                database,
                restart_containers,
                config,
            }) => {
                if key.split('.').any(str::is_empty) {
                    return Err(format!("Invalid configuration key '{}'", key));
                }
                Ok(ExecutionMode::Set(SetConfig {
                    key: key.clone(),
                    value: parse_stored_value(value),
                    database_url: database.clone(),
                    restart_containers: *restart_containers,
                    config: config.clone(),
                }))
            }
            None => Err(
                "No command specified. Use 'docaiche --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    /// Configuration file named on the command line, if any
    pub fn config_override(&self) -> Option<PathBuf> {
        match &self.command {
            Some(Commands::ShowConfig { config, .. })
            | Some(Commands::CheckProviders { config })
            | Some(Commands::TestProvider { config, .. })
            | Some(Commands::Generate { config, .. })
            | Some(Commands::Watch { config, .. })
            | Some(Commands::Set { config, .. }) => config.clone(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_show_config() {
        let args = Args::try_parse_from(["docaiche", "show-config", "--config", "c.yaml", "--json"])
            .unwrap();
        match args.mode().unwrap() {
            ExecutionMode::ShowConfig { config, json } => {
                assert_eq!(config, Some(PathBuf::from("c.yaml")));
                assert!(json);
            }
            other => panic!("Expected ShowConfig, got {:?}", other),
        }
        assert_eq!(args.config_override(), Some(PathBuf::from("c.yaml")));
    }

    #[test]
    fn test_set_value_is_typed() {
        let args = Args::try_parse_from([
            "docaiche",
            "set",
            "app.workers",
            "8",
            "--database",
            "sqlite::memory:",
        ])
        .unwrap();
        let ExecutionMode::Set(set) = args.mode().unwrap() else {
            panic!("Expected Set mode");
        };
        assert_eq!(set.value, json!(8));

        let args = Args::try_parse_from([
            "docaiche",
            "set",
            "redis.host",
            "cache-host",
        ])
        .unwrap();
        let ExecutionMode::Set(set) = args.mode().unwrap() else {
            panic!("Expected Set mode");
        };
        assert_eq!(set.value, json!("cache-host"));
        assert_eq!(set.database_url, None);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let args = Args {
            command: Some(Commands::Set {
                key: "app..workers".to_string(),
                value: "1".to_string(),
                database: Some("sqlite::memory:".to_string()),
                restart_containers: false,
                config: None,
            }),
        };
        assert!(args.mode().is_err());

        let args = Args {
            command: Some(Commands::Watch {
                config: None,
                interval: 0,
            }),
        };
        assert!(args.mode().is_err());

        assert!(Args { command: None }.mode().is_err());
        assert!(Args::try_parse_from(["docaiche", "set", "a.b"]).is_err());
    }

    #[test]
    fn test_watch_default_interval() {
        let args = Args::try_parse_from(["docaiche", "watch"]).unwrap();
        match args.mode().unwrap() {
            ExecutionMode::Watch { interval, .. } => assert_eq!(interval, DEFAULT_WATCH_INTERVAL),
            other => panic!("Expected Watch, got {:?}", other),
        }
    }
}
