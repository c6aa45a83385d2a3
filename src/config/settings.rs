use crate::core::DIFFICULTY_BITS;
use crate::error::{BlockchainError, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::load_default);

pub const CONFIG_FILE: &str = "ledger.toml";

static DEFAULT_DATA_DIR: &str = "blockchain.db";
static DEFAULT_WALLET_FILE: &str = "wallet.dat";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const WALLET_FILE_KEY: &str = "LEDGER_WALLET_FILE";
const DIFFICULTY_BITS_KEY: &str = "LEDGER_DIFFICULTY_BITS";

/// Settings accepted from `ledger.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    data_dir: Option<String>,
    wallet_file: Option<String>,
    difficulty_bits: Option<u32>,
}

/// Node settings: built-in defaults, then `ledger.toml`, then environment.
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        Config {
            inner: RwLock::new(inner.clone()),
        }
    }
}

impl Config {
    /// Built-in defaults only.
    pub fn new() -> Config {
        let mut map = HashMap::new();
        map.insert(String::from(DATA_DIR_KEY), String::from(DEFAULT_DATA_DIR));
        map.insert(
            String::from(WALLET_FILE_KEY),
            String::from(DEFAULT_WALLET_FILE),
        );
        map.insert(
            String::from(DIFFICULTY_BITS_KEY),
            DIFFICULTY_BITS.to_string(),
        );
        Config {
            inner: RwLock::new(map),
        }
    }

    /// Defaults, overlaid with `ledger.toml` from the working directory when
    /// present, overlaid with environment variables.
    pub fn load_default() -> Config {
        let config = Config::new();
        let path = Path::new(CONFIG_FILE);
        if path.exists() {
            if let Err(e) = config.apply_file(path) {
                log::warn!("Ignoring {CONFIG_FILE}: {e}");
            }
        }
        config.apply_env();
        config
    }

    pub fn from_toml_str(contents: &str) -> Result<Config> {
        let config = Config::new();
        config.apply_toml(contents)?;
        Ok(config)
    }

    pub fn apply_file(&self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        self.apply_toml(&contents)
    }

    fn apply_toml(&self, contents: &str) -> Result<()> {
        let settings: FileSettings = toml::from_str(contents)?;
        if let Some(dir) = settings.data_dir {
            self.set(DATA_DIR_KEY, dir);
        }
        if let Some(file) = settings.wallet_file {
            self.set(WALLET_FILE_KEY, file);
        }
        if let Some(bits) = settings.difficulty_bits {
            self.set_difficulty_bits(bits)?;
        }
        Ok(())
    }

    fn apply_env(&self) {
        for key in [DATA_DIR_KEY, WALLET_FILE_KEY, DIFFICULTY_BITS_KEY] {
            if let Ok(value) = env::var(key) {
                self.set(key, value);
            }
        }
    }

    fn set(&self, key: &str, value: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config - this should never happen");
        inner.insert(String::from(key), value);
    }

    fn get(&self, key: &str) -> Option<String> {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner.get(key).cloned()
    }

    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(
            self.get(DATA_DIR_KEY)
                .unwrap_or_else(|| String::from(DEFAULT_DATA_DIR)),
        )
    }

    pub fn set_data_dir(&self, dir: &Path) {
        self.set(DATA_DIR_KEY, dir.to_string_lossy().to_string());
    }

    pub fn get_wallet_file(&self) -> PathBuf {
        PathBuf::from(
            self.get(WALLET_FILE_KEY)
                .unwrap_or_else(|| String::from(DEFAULT_WALLET_FILE)),
        )
    }

    pub fn set_wallet_file(&self, file: &Path) {
        self.set(WALLET_FILE_KEY, file.to_string_lossy().to_string());
    }

    /// Difficulty used for newly mined blocks. Unparseable values fall back
    /// to the built-in constant.
    pub fn get_difficulty_bits(&self) -> u32 {
        match self.get(DIFFICULTY_BITS_KEY).map(|v| v.parse::<u32>()) {
            Some(Ok(bits)) if (1..=255).contains(&bits) => bits,
            Some(_) => {
                log::warn!("Invalid {DIFFICULTY_BITS_KEY}, using {DIFFICULTY_BITS}");
                DIFFICULTY_BITS
            }
            None => DIFFICULTY_BITS,
        }
    }

    pub fn set_difficulty_bits(&self, bits: u32) -> Result<()> {
        if !(1..=255).contains(&bits) {
            return Err(BlockchainError::Config(format!(
                "difficulty bits must be within 1..=255, got {bits}"
            )));
        }
        self.set(DIFFICULTY_BITS_KEY, bits.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.get_difficulty_bits(), DIFFICULTY_BITS);
        assert_eq!(config.get_data_dir(), PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.get_wallet_file(), PathBuf::from(DEFAULT_WALLET_FILE));
    }

    #[test]
    fn test_toml_overrides() {
        let config = Config::from_toml_str(
            "data_dir = \"/tmp/ledger\"\ndifficulty_bits = 8\n",
        )
        .unwrap();
        assert_eq!(config.get_data_dir(), PathBuf::from("/tmp/ledger"));
        assert_eq!(config.get_difficulty_bits(), 8);
        assert_eq!(config.get_wallet_file(), PathBuf::from(DEFAULT_WALLET_FILE));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            Config::from_toml_str("difficulty_bits = \"many\""),
            Err(BlockchainError::Config(_))
        ));
        assert!(Config::from_toml_str("difficulty_bits = 0").is_err());
    }

    #[test]
    fn test_clone_is_independent() {
        let config = Config::new();
        let copy = config.clone();
        copy.set_difficulty_bits(4).unwrap();
        assert_eq!(config.get_difficulty_bits(), DIFFICULTY_BITS);
        assert_eq!(copy.get_difficulty_bits(), 4);
    }
}
