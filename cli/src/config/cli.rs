use std::path::PathBuf;
use std::sync::OnceLock;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use vicinity::{Distance, HnswConfig};

static DEFAULT_CONFIG: OnceLock<BenchConfig> = OnceLock::new();

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Builds an index, runs queries against it and reports recall and timings
    Bench(BenchConfig),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum DistanceKind {
    Euclidean,
    SquaredEuclidean,
    Manhattan,
    Cosine,
    InnerProduct,
}

impl From<DistanceKind> for Distance {
    fn from(kind: DistanceKind) -> Self {
        match kind {
            DistanceKind::Euclidean => Distance::Euclidean,
            DistanceKind::SquaredEuclidean => Distance::SquaredEuclidean,
            DistanceKind::Manhattan => Distance::Manhattan,
            DistanceKind::Cosine => Distance::Cosine,
            DistanceKind::InnerProduct => Distance::InnerProduct,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BenchConfig {
    /// Dimension of generated vectors, ignored when reading from `--input`
    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).dimension)]
    pub dimension: usize,

    /// Number of vectors generated and inserted
    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).count)]
    pub count: usize,

    /// Number of generated query vectors
    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).queries)]
    pub queries: usize,

    /// Neighbours requested per query
    #[arg(short, long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).k)]
    pub k: usize,

    /// Maximum connections per node (M), layer 0 allows twice as many
    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).maximum_connections)]
    pub maximum_connections: usize,

    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).ef_construction)]
    pub ef_construction: usize,

    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).ef)]
    pub ef: usize,

    /// Worker threads used to build the index
    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).threads)]
    pub threads: usize,

    /// Seed for generated vectors
    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).seed)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).distance)]
    pub distance: DistanceKind,

    /// Base vectors in `.fvecs` format instead of generated ones
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Query vectors in `.fvecs` format instead of generated ones
    #[arg(long)]
    pub query_input: Option<PathBuf>,

    ///  Log level
    #[arg(long, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).log_level.clone())]
    pub log_level: String,

    /// Emit logs as json instead of pretty printed lines
    #[arg(long, action=ArgAction::SetTrue, default_value_t =
    DEFAULT_CONFIG.get_or_init(BenchConfig::default).json_logs)]
    pub json_logs: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            count: 10_000,
            queries: 100,
            k: 10,
            maximum_connections: 16,
            ef_construction: 200,
            ef: 64,
            threads: std::thread::available_parallelism()
                .map(|threads| threads.get())
                .unwrap_or(1),
            seed: 42,
            distance: DistanceKind::Euclidean,
            input: None,
            query_input: None,
            log_level: String::from("info"),
            json_logs: false,
        }
    }
}

impl BenchConfig {
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn queries(mut self, queries: usize) -> Self {
        self.queries = queries;
        self
    }

    pub fn input(mut self, input: Option<PathBuf>) -> Self {
        self.input = input;
        self
    }

    pub fn query_input(mut self, query_input: Option<PathBuf>) -> Self {
        self.query_input = query_input;
        self
    }

    pub fn distance(mut self, distance: DistanceKind) -> Self {
        self.distance = distance;
        self
    }

    /// Index configuration for `dimension` and room for `capacity` items
    pub fn index_config(&self, dimension: usize, capacity: usize) -> HnswConfig {
        HnswConfig::new(dimension, capacity)
            .maximum_connections(self.maximum_connections)
            .ef_construction(self.ef_construction)
            .ef(self.ef)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_parser() {
        let cli = Cli::parse_from(["vicinity", "bench"]);
        let Commands::Bench(config) = cli.command;
        let default = BenchConfig::default();
        assert_eq!(config.count, default.count);
        assert_eq!(config.distance, DistanceKind::Euclidean);
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_parse_overrides() {
        let cli = Cli::parse_from([
            "vicinity",
            "bench",
            "--count",
            "500",
            "-k",
            "3",
            "--distance",
            "inner-product",
            "--json-logs",
        ]);
        let Commands::Bench(config) = cli.command;
        assert_eq!(config.count, 500);
        assert_eq!(config.k, 3);
        assert_eq!(Distance::from(config.distance), Distance::InnerProduct);
        assert!(config.json_logs);
    }
}
