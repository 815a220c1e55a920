use clap::builder::RangedU64ValueParser;
use clap::{Parser, ValueEnum};

use std::path::PathBuf;
use std::time::Duration;

use crate::blockchain::verification::MAX_DIFFICULTY;
use crate::blockchain::LedgerConfig;

/// Where the ledger record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Three-line text record per node
    File,
    /// sled database, one tree per node
    Sled,
}

/// Node settings, from flags or `LEDGER_*` environment variables
#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Proof-of-work ledger node")]
pub struct NodeConfig {
    /// Address to bind the HTTP API to
    #[arg(long, env = "LEDGER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP API to
    #[arg(short, long, env = "LEDGER_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Discriminator for this node's files; defaults to the port
    #[arg(long, env = "LEDGER_NODE_ID")]
    pub node_id: Option<String>,

    /// Directory for the ledger record and wallet
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "LEDGER_STORAGE", value_enum, default_value_t = StorageBackend::File)]
    pub storage: StorageBackend,

    /// Leading zero hex digits a proof digest must have, at most 64
    #[arg(
        long,
        env = "LEDGER_DIFFICULTY",
        default_value_t = 2,
        value_parser = RangedU64ValueParser::<usize>::new().range(0..=MAX_DIFFICULTY as u64)
    )]
    pub difficulty: usize,

    /// Amount credited to the miner of each block
    #[arg(long, env = "LEDGER_MINING_REWARD", default_value_t = 10.0)]
    pub mining_reward: f64,

    /// Per-request timeout when talking to peers
    #[arg(long, env = "LEDGER_PEER_TIMEOUT_SECS", default_value_t = 5)]
    pub peer_timeout_secs: u64,
}

impl NodeConfig {
    pub fn node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| self.port.to_string())
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
        }
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet-{}.txt", self.node_id()))
    }

    pub fn sled_path(&self) -> PathBuf {
        self.data_dir.join("sled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    /// Parses flags only, ignoring any `LEDGER_*` variables in the environment
    fn parse(args: &[&str]) -> Result<NodeConfig, clap::Error> {
        let matches = NodeConfig::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .try_get_matches_from(args)?;
        NodeConfig::from_arg_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["pow_ledger"]).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.node_id(), "5000");
        assert_eq!(config.storage, StorageBackend::File);
        assert_eq!(config.ledger_config(), LedgerConfig::default());
        assert_eq!(config.peer_timeout(), Duration::from_secs(5));
        assert_eq!(config.wallet_path(), PathBuf::from("data/wallet-5000.txt"));
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "pow_ledger",
            "--port",
            "5001",
            "--node-id",
            "alpha",
            "--storage",
            "sled",
            "--difficulty",
            "3",
            "--mining-reward",
            "25",
        ])
        .unwrap();

        assert_eq!(config.node_id(), "alpha");
        assert_eq!(config.storage, StorageBackend::Sled);
        assert_eq!(
            config.ledger_config(),
            LedgerConfig {
                difficulty: 3,
                mining_reward: 25.0,
            }
        );
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let result = parse(&["pow_ledger", "--storage", "postgres"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_difficulty_is_bounded_by_digest_length() {
        assert_eq!(parse(&["pow_ledger", "--difficulty", "64"]).unwrap().difficulty, 64);
        assert!(parse(&["pow_ledger", "--difficulty", "65"]).is_err());
    }
}
