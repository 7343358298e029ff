//! Command line and operator configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serving_common::telemetry::LogFormat;
use serving_common::{DEFAULT_OPERAND_NAME, DEFAULT_OPERAND_NAMESPACE};
use thiserror::Error;

/// Directory under `KO_DATA_PATH` holding the release manifest
pub const KO_DATA_MANIFEST_DIR: &str = "knative-serving";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `--manifest-path` nor `KO_DATA_PATH` was given
    #[error("no manifest path: pass --manifest-path or set MANIFEST_PATH or KO_DATA_PATH")]
    MissingManifestPath,
}

/// Serving operator - installs and manages Knative Serving
#[derive(Parser, Debug)]
#[command(name = "serving-operator", version, about, long_about = None)]
pub struct Cli {
    /// Manifest file or directory
    #[arg(long, env = "MANIFEST_PATH", global = true)]
    pub manifest_path: Option<PathBuf>,

    /// Read manifests from sub-directories too
    #[arg(long, global = true)]
    pub recursive: bool,

    /// Namespace of the default instance
    #[arg(long, default_value = DEFAULT_OPERAND_NAMESPACE, global = true)]
    pub operand_namespace: String,

    /// Name of the default instance
    #[arg(long, default_value = DEFAULT_OPERAND_NAME, global = true)]
    pub operand_name: String,

    /// Log format: json or text
    #[arg(long, env = "LOG_FORMAT", default_value = "json", global = true)]
    pub log_format: LogFormat,

    /// Delay before an unready or failed instance is reconciled again
    #[arg(long, default_value_t = 5, global = true)]
    pub requeue_seconds: u64,

    /// Subcommand; `controller` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the controller (default)
    Controller,
    /// Print the KnativeServing CRD and exit
    Crd,
}

/// Settings the controller runs with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Manifest file or directory
    pub manifest_path: PathBuf,
    /// Walk sub-directories of `manifest_path`
    pub recursive: bool,
    /// Namespace of the default instance
    pub operand_namespace: String,
    /// Name of the default instance
    pub operand_name: String,
    /// Requeue delay for unready or failed instances
    pub requeue_after: Duration,
}

impl OperatorConfig {
    /// Resolve the configuration from parsed arguments
    ///
    /// `ko_data_path` is the value of `KO_DATA_PATH`, used when no manifest
    /// path was given.
    pub fn from_cli(cli: &Cli, ko_data_path: Option<String>) -> Result<Self, ConfigError> {
        let manifest_path = match (&cli.manifest_path, ko_data_path) {
            (Some(path), _) => path.clone(),
            (None, Some(ko_data)) if !ko_data.is_empty() => {
                PathBuf::from(ko_data).join(KO_DATA_MANIFEST_DIR)
            }
            _ => return Err(ConfigError::MissingManifestPath),
        };
        Ok(Self {
            manifest_path,
            recursive: cli.recursive,
            operand_namespace: cli.operand_namespace.clone(),
            operand_name: cli.operand_name.clone(),
            requeue_after: Duration::from_secs(cli.requeue_seconds),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("serving-operator").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let cli = parse(&["--manifest-path", "/manifests"]);
        assert_eq!(cli.command, None);
        let config = OperatorConfig::from_cli(&cli, None).unwrap();
        assert_eq!(config.manifest_path, PathBuf::from("/manifests"));
        assert!(!config.recursive);
        assert_eq!(config.operand_namespace, "knative-serving");
        assert_eq!(config.operand_name, "knative-serving");
        assert_eq!(config.requeue_after, Duration::from_secs(5));
    }

    #[test]
    fn falls_back_to_ko_data_path() {
        let cli = parse(&["controller"]);
        let config = OperatorConfig::from_cli(&cli, Some("/var/run/ko".to_string())).unwrap();
        assert_eq!(
            config.manifest_path,
            PathBuf::from("/var/run/ko/knative-serving")
        );
        assert_eq!(cli.command, Some(Commands::Controller));
    }

    #[test]
    fn missing_manifest_path_is_an_error() {
        let cli = parse(&[]);
        assert!(matches!(
            OperatorConfig::from_cli(&cli, None),
            Err(ConfigError::MissingManifestPath)
        ));
        assert!(OperatorConfig::from_cli(&cli, Some(String::new())).is_err());
    }

    #[test]
    fn flags_after_subcommand() {
        let cli = parse(&[
            "controller",
            "--recursive",
            "--requeue-seconds",
            "30",
            "--log-format",
            "text",
            "--operand-namespace",
            "serving",
        ]);
        assert_eq!(cli.log_format, LogFormat::Text);
        let config = OperatorConfig::from_cli(&cli, Some("/ko".to_string())).unwrap();
        assert!(config.recursive);
        assert_eq!(config.operand_namespace, "serving");
        assert_eq!(config.requeue_after, Duration::from_secs(30));
    }

    #[test]
    fn crd_subcommand() {
        assert_eq!(parse(&["crd"]).command, Some(Commands::Crd));
        assert!(Cli::try_parse_from(["serving-operator", "--log-format", "xml"]).is_err());
    }
}
