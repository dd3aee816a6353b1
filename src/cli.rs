use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// YAML config file. Environment variables override its values.
    #[clap(short, long, global = true, env = "SIGN_SEARCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:8000
        #[clap(short, long)]
        bind: Option<String>,
    },

    /// Index a JSONL dataset into the configured collection
    Index {
        /// Path to a JSONL file, one record per line
        path: PathBuf,
    },

    /// Query the collection from the command line
    Search {
        query: String,

        /// Number of results
        #[clap(short, long)]
        limit: Option<usize>,

        /// Restrict to a region (B, T, N or its display name)
        #[clap(short, long)]
        region: Option<String>,

        /// Extract keywords with the LLM first and search each of them
        #[clap(short, long, default_value = "false")]
        keywords: bool,
    },

    /// Drop the collection and create it empty
    Recreate {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let args = Args::try_parse_from([
            "sign-search",
            "search",
            "xin chào",
            "--limit",
            "3",
            "--region",
            "N",
            "--keywords",
        ])
        .unwrap();

        match args.command {
            Command::Search {
                query,
                limit,
                region,
                keywords,
            } => {
                assert_eq!(query, "xin chào");
                assert_eq!(limit, Some(3));
                assert_eq!(region.as_deref(), Some("N"));
                assert!(keywords);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_config_flag_is_global() {
        let args = Args::try_parse_from([
            "sign-search",
            "recreate",
            "--yes",
            "--config",
            "cfg.yaml",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("cfg.yaml")));
        assert!(matches!(args.command, Command::Recreate { yes: true }));
    }
}
