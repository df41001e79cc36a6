//! Command-line arguments.

use clap::{Parser, Subcommand, ValueEnum};
use dbmbridge::Params;

/// Inspect and edit dbmbridge stores
#[derive(Parser, Debug)]
#[command(name = "dbmtool")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Tuning parameters as `key=value,...`
    #[arg(long, value_parser = parse_params, default_value = "")]
    pub params: Params,

    /// Worker threads for `batch`; zero picks the default
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Path of the store
    pub path: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a record
    Set { key: String, value: String },

    /// Print the value of a record
    Get { key: String },

    /// Remove a record
    Remove { key: String },

    /// Add to an integer record and print its new value
    Incr {
        key: String,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },

    /// Print every record as key<TAB>value
    List,

    /// Print the keys matching a pattern
    Search { mode: SearchMode, pattern: String },

    /// Write every record to a flat record file
    Export { file: String },

    /// Read records from a flat record file
    Import { file: String },

    /// Write every key to a file, one per line
    Keys { file: String },

    /// Print store properties
    Inspect,

    /// Store records through the async engine
    Batch {
        #[arg(value_parser = parse_record, required = true)]
        records: Vec<(String, String)>,
    },
}

impl Command {
    /// Whether the store has to be opened writable.
    pub fn is_writing(&self) -> bool {
        matches!(
            self,
            Command::Set { .. }
                | Command::Remove { .. }
                | Command::Incr { .. }
                | Command::Import { .. }
                | Command::Batch { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "set",
            Command::Get { .. } => "get",
            Command::Remove { .. } => "remove",
            Command::Incr { .. } => "incr",
            Command::List => "list",
            Command::Search { .. } => "search",
            Command::Export { .. } => "export",
            Command::Import { .. } => "import",
            Command::Keys { .. } => "keys",
            Command::Inspect => "inspect",
            Command::Batch { .. } => "batch",
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    Contain,
    Begin,
    End,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Contain => "contain",
            SearchMode::Begin => "begin",
            SearchMode::End => "end",
        }
    }
}

fn parse_params(text: &str) -> Result<Params, String> {
    Ok(Params::parse(text))
}

fn parse_record(text: &str) -> Result<(String, String), String> {
    text.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_come_before_the_path() {
        let cli = Cli::try_parse_from([
            "dbmtool",
            "--params",
            "dbm=BabyDBM,truncate=true",
            "--workers",
            "3",
            "casket.tkh",
            "batch",
            "a=1",
            "b=",
        ])
        .unwrap();
        assert_eq!(cli.path, "casket.tkh");
        assert_eq!(cli.workers, 3);
        assert_eq!(cli.params.get("dbm"), Some("BabyDBM"));
        let Command::Batch { records } = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(
            records,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), String::new())
            ]
        );
    }

    #[test]
    fn negative_increment() {
        let cli = Cli::try_parse_from(["dbmtool", "n.tkh", "incr", "n", "-3"]).unwrap();
        assert!(cli.command.is_writing());
        assert!(matches!(cli.command, Command::Incr { delta: -3, .. }));
        assert!(cli.params.is_empty());
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["dbmtool"]).is_err());
        assert!(Cli::try_parse_from(["dbmtool", "x.tkh", "set", "only-key"]).is_err());
        assert!(Cli::try_parse_from(["dbmtool", "x.tkh", "batch"]).is_err());
        assert!(Cli::try_parse_from(["dbmtool", "x.tkh", "batch", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["dbmtool", "x.tkh", "search", "middle", "p"]).is_err());
    }
}
