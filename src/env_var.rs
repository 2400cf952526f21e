use std::path::PathBuf;

use serde::Deserialize;

fn default_sizes() -> Vec<usize> {
    vec![512, 1024, 2048, 4096]
}

fn default_participants() -> Vec<usize> {
    vec![1, 2, 4, 8]
}

fn default_threads() -> Vec<usize> {
    vec![2, 4, 6, 8, 10, 12]
}

fn default_backend() -> String {
    "channel".to_owned()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_deadlock_timeout() -> f64 {
    600.0
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Matrix sizes (n) to sweep over, default: 512,1024,2048,4096
    #[serde(default = "default_sizes")]
    pub sizes: Vec<usize>,

    /// Participant counts to launch a distributed group with, default: 1,2,4,8
    #[serde(default = "default_participants")]
    pub participants: Vec<usize>,

    /// Thread pool sizes for the shared memory benchmark, default: 2,4,6,8,10,12
    #[serde(default = "default_threads")]
    pub threads: Vec<usize>,

    /// The lamellae backend to use
    /// local -- single pe execution
    /// channel -- multi pe execution, pes connected by message channels (default)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Seed for operand generation, entropy seeded when unset
    pub seed: Option<u64>,

    /// Directory the result CSV files are appended to, default: current directory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Seconds a participant may wait in a barrier before a potential deadlock is reported, default: 600.0 seconds
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// Pin each participant thread to its own core. Default: false
    #[serde(default)]
    pub pin_threads: bool,
}

impl Config {
    /// Read the configuration from `DGEMM_*` environment variables.
    pub fn from_env() -> Result<Config, envy::Error> {
        envy::prefixed("DGEMM_").from_env::<Config>()
    }

    /// Read the configuration from an explicit list of (key, value) pairs, keys without the `DGEMM_` prefix.
    pub fn from_pairs<I>(pairs: I) -> Result<Config, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Config>(pairs.into_iter().map(|(k, v)| (k.to_uppercase(), v)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sizes: default_sizes(),
            participants: default_participants(),
            threads: default_threads(),
            backend: default_backend(),
            seed: None,
            output_dir: default_output_dir(),
            deadlock_timeout: default_deadlock_timeout(),
            pin_threads: false,
        }
    }
}
