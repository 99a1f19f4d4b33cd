//! Node configuration.
use anyhow::Context as _;
use keel_bft as bft;
use keel_concurrency::time;
use keel_crypto::{Text, TextFmt};
use keel_roles::validator;
use keel_storage::FileSignRecordStore;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Decodes a json document into `T`, rejecting trailing content.
pub fn decode_json<T: serde::de::DeserializeOwned>(json: &str) -> anyhow::Result<T> {
    let mut d = serde_json::Deserializer::from_str(json);
    let p = T::deserialize(&mut d)?;
    d.end()?;
    Ok(p)
}

/// Encodes `x` as pretty-printed json.
pub fn encode_json<T: Serialize>(x: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(x)?)
}

/// Consensus timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsConfig {
    pub propose_ms: u64,
    pub propose_delta_ms: u64,
    pub prevote_ms: u64,
    pub prevote_delta_ms: u64,
    pub precommit_ms: u64,
    pub precommit_delta_ms: u64,
    pub commit_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self::from(&bft::Timeouts::default())
    }
}

fn to_ms(d: time::Duration) -> u64 {
    d.whole_milliseconds().try_into().unwrap_or(0)
}

fn from_ms(ms: u64) -> anyhow::Result<time::Duration> {
    Ok(time::Duration::milliseconds(ms.try_into()?))
}

impl From<&bft::Timeouts> for TimeoutsConfig {
    fn from(t: &bft::Timeouts) -> Self {
        Self {
            propose_ms: to_ms(t.propose),
            propose_delta_ms: to_ms(t.propose_delta),
            prevote_ms: to_ms(t.prevote),
            prevote_delta_ms: to_ms(t.prevote_delta),
            precommit_ms: to_ms(t.precommit),
            precommit_delta_ms: to_ms(t.precommit_delta),
            commit_ms: to_ms(t.commit),
        }
    }
}

impl TimeoutsConfig {
    /// Timeouts of the bft component.
    pub fn timeouts(&self) -> anyhow::Result<bft::Timeouts> {
        Ok(bft::Timeouts {
            propose: from_ms(self.propose_ms).context("propose_ms")?,
            propose_delta: from_ms(self.propose_delta_ms).context("propose_delta_ms")?,
            prevote: from_ms(self.prevote_ms).context("prevote_ms")?,
            prevote_delta: from_ms(self.prevote_delta_ms).context("prevote_delta_ms")?,
            precommit: from_ms(self.precommit_ms).context("precommit_ms")?,
            precommit_delta: from_ms(self.precommit_delta_ms).context("precommit_delta_ms")?,
            commit: from_ms(self.commit_ms).context("commit_ms")?,
        })
    }
}

/// Committee member, as written in the config file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidatorJson {
    /// Public key in `TextFmt`.
    key: String,
    weight: u64,
}

/// Layout of the config file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AppConfigJson {
    chain_id: String,
    initial_height: u64,
    validators: Vec<ValidatorJson>,
    wal_path: PathBuf,
    sign_record_path: PathBuf,
    #[serde(default)]
    timeouts: TimeoutsConfig,
    #[serde(default)]
    metrics_server_addr: Option<SocketAddr>,
}

/// Node configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub genesis: validator::Genesis,
    pub wal_path: PathBuf,
    pub sign_record_path: PathBuf,
    pub timeouts: TimeoutsConfig,
    pub metrics_server_addr: Option<SocketAddr>,
}

impl AppConfig {
    /// Decodes and validates a config file.
    pub fn decode(json: &str) -> anyhow::Result<Self> {
        let raw: AppConfigJson = decode_json(json)?;
        let validators = raw.validators.iter().enumerate().map(|(i, v)| {
            let key = Text::new(&v.key)
                .decode()
                .with_context(|| format!("validators[{i}].key"))?;
            Ok(validator::WeightedValidator {
                key,
                weight: v.weight,
            })
        });
        let validators: anyhow::Result<Vec<_>> = validators.collect();
        let committee = validator::Committee::new(validators?).context("validators")?;
        let genesis = validator::Genesis {
            chain_id: validator::ChainId(raw.chain_id),
            initial_height: validator::Height(raw.initial_height),
            committee,
        };
        genesis.verify().context("genesis")?;
        raw.timeouts.timeouts().context("timeouts")?;
        Ok(Self {
            genesis,
            wal_path: raw.wal_path,
            sign_record_path: raw.sign_record_path,
            timeouts: raw.timeouts,
            metrics_server_addr: raw.metrics_server_addr,
        })
    }

    /// Encodes the config file.
    pub fn encode(&self) -> anyhow::Result<String> {
        encode_json(&AppConfigJson {
            chain_id: self.genesis.chain_id.0.clone(),
            initial_height: self.genesis.initial_height.0,
            validators: self
                .genesis
                .committee
                .iter()
                .map(|v| ValidatorJson {
                    key: TextFmt::encode(&v.key),
                    weight: v.weight,
                })
                .collect(),
            wal_path: self.wal_path.clone(),
            sign_record_path: self.sign_record_path.clone(),
            timeouts: self.timeouts.clone(),
            metrics_server_addr: self.metrics_server_addr,
        })
    }

    /// Config of a chain with a single validator, keeping its state in
    /// `dir`. Returns the validator's key as well.
    pub fn default_for(
        chain_id: &str,
        dir: &Path,
    ) -> anyhow::Result<(Self, validator::SecretKey)> {
        let key = validator::SecretKey::generate();
        let committee = validator::Committee::new([validator::WeightedValidator {
            key: key.public(),
            weight: 1,
        }])?;
        let cfg = Self {
            genesis: validator::Genesis {
                chain_id: validator::ChainId(chain_id.to_owned()),
                initial_height: validator::Height(1),
                committee,
            },
            wal_path: dir.join("cs.wal"),
            sign_record_path: dir.join("sign_record.json"),
            timeouts: TimeoutsConfig::default(),
            metrics_server_addr: None,
        };
        Ok((cfg, key))
    }
}

/// Paths to the config files of a node.
#[derive(Debug)]
pub struct ConfigPaths<'a> {
    pub config: &'a Path,
    pub validator_key: &'a Path,
}

/// Configuration read from the config files.
#[derive(Debug)]
pub struct Configs {
    pub app: AppConfig,
    pub validator_key: validator::SecretKey,
}

impl ConfigPaths<'_> {
    /// Reads the config files.
    pub fn read(self) -> anyhow::Result<Configs> {
        let json = fs::read_to_string(self.config)
            .with_context(|| format!("failed reading {}", self.config.display()))?;
        let app = AppConfig::decode(&json).with_context(|| self.config.display().to_string())?;
        let key = fs::read_to_string(self.validator_key)
            .with_context(|| format!("failed reading {}", self.validator_key.display()))?;
        let validator_key: validator::SecretKey = Text::new(key.trim())
            .decode()
            .with_context(|| self.validator_key.display().to_string())?;
        if !app
            .genesis
            .committee
            .contains(&validator_key.public().address())
        {
            tracing::warn!(
                validator = %validator_key.public().address(),
                "validator key is not in the committee, the node will only observe"
            );
        }
        Ok(Configs { app, validator_key })
    }
}

impl Configs {
    /// Config of the bft component, running `application`.
    pub fn bft_config(&self, application: Arc<dyn bft::Application>) -> anyhow::Result<bft::Config> {
        Ok(bft::Config {
            secret_key: self.validator_key.clone(),
            genesis: self.app.genesis.clone(),
            wal_path: self.app.wal_path.clone(),
            sign_record_store: Box::new(FileSignRecordStore::new(&self.app.sign_record_path)),
            event_bus: Arc::new(bft::events::EventBus::new()),
            application,
            timeouts: self.app.timeouts.timeouts().context("timeouts")?,
            policy: Box::new(bft::policy::TendermintPolicy),
        })
    }
}
