use crate::{decode_json, AppConfig, ConfigPaths, HashChainApp, TimeoutsConfig};
use keel_bft::{self as bft, Application as _};
use keel_concurrency::{ctx, testonly::abort_on_panic};
use keel_crypto::TextFmt as _;
use keel_roles::validator::{self, testonly::Setup};
use pretty_assertions::assert_eq;
use std::{fs, net::SocketAddr, path::Path, sync::Arc};

fn make_config(genesis: validator::Genesis, dir: &Path) -> AppConfig {
    AppConfig {
        genesis,
        wal_path: dir.join("cs.wal"),
        sign_record_path: dir.join("sign_record.json"),
        timeouts: TimeoutsConfig {
            propose_ms: 2000,
            commit_ms: 500,
            ..TimeoutsConfig::default()
        },
        metrics_server_addr: Some(SocketAddr::from(([127, 0, 0, 1], 3154))),
    }
}

#[test]
fn app_config_encoding() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new_with_weights(rng, vec![1, 2, 3, 4]);
    let cfg = make_config(setup.genesis, Path::new("/var/keel"));
    let json = cfg.encode().unwrap();
    assert_eq!(cfg, AppConfig::decode(&json).unwrap());
}

#[test]
fn timeouts_default_to_the_bft_defaults() {
    let cfg: TimeoutsConfig = decode_json("{}").unwrap();
    assert_eq!(TimeoutsConfig::default(), cfg);
    assert_eq!(bft::Timeouts::default(), cfg.timeouts().unwrap());
    assert_eq!(3000, cfg.propose_ms);
    assert_eq!(500, cfg.propose_delta_ms);
}

#[test]
fn invalid_configs_are_rejected() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 2);
    let key = setup.validator_keys[0].public().encode();
    let cfg = |chain_id: &str, validators: &str, extra: &str| {
        format!(
            r#"{{"chain_id":"{chain_id}","initial_height":1,"validators":{validators},
                "wal_path":"cs.wal","sign_record_path":"sign_record.json"{extra}}}"#
        )
    };
    let one = format!(r#"[{{"key":"{key}","weight":1}}]"#);
    assert!(AppConfig::decode(&cfg("chain", &one, "")).is_ok());

    // Unknown field.
    assert!(AppConfig::decode(&cfg("chain", &one, r#","peers":[]"#)).is_err());
    // Empty chain id.
    assert!(AppConfig::decode(&cfg("", &one, "")).is_err());
    // Duplicate validator.
    let twice = format!(r#"[{{"key":"{key}","weight":1}},{{"key":"{key}","weight":2}}]"#);
    assert!(AppConfig::decode(&cfg("chain", &twice, "")).is_err());
    // Zero weight.
    let zero = format!(r#"[{{"key":"{key}","weight":0}}]"#);
    assert!(AppConfig::decode(&cfg("chain", &zero, "")).is_err());
    // Not a public key.
    let bad = r#"[{"key":"validator:public:ed25519:00","weight":1}]"#;
    assert!(AppConfig::decode(&cfg("chain", bad, "")).is_err());
    // Trailing content.
    assert!(AppConfig::decode(&format!("{} {{}}", cfg("chain", &one, ""))).is_err());
}

#[test]
fn config_files_are_read() {
    let dir = tempfile::tempdir().unwrap();
    let (cfg, key) = AppConfig::default_for("keel-test", dir.path()).unwrap();
    let config = dir.path().join("config.json");
    let validator_key = dir.path().join("validator_key");
    fs::write(&config, cfg.encode().unwrap()).unwrap();
    fs::write(&validator_key, format!("{}\n", key.encode())).unwrap();

    let configs = ConfigPaths {
        config: &config,
        validator_key: &validator_key,
    }
    .read()
    .unwrap();
    assert_eq!(cfg, configs.app);
    assert_eq!(key.public(), configs.validator_key.public());

    // Missing key file.
    assert!(ConfigPaths {
        config: &config,
        validator_key: &dir.path().join("missing"),
    }
    .read()
    .is_err());
}

fn block(app_hash: validator::AppHash, height: u64) -> validator::Block {
    let app = HashChainApp::default();
    validator::Block {
        chain_id: validator::ChainId("keel-test".to_owned()),
        height: validator::Height(height),
        last_block_id: None,
        app_hash,
        payload: app.propose(validator::Height(height)).unwrap(),
    }
}

#[test]
fn hash_chain_app() {
    let app = HashChainApp::default();
    let payload = app.propose(validator::Height(1)).unwrap();
    app.verify(validator::Height(1), &payload).unwrap();
    assert!(app.verify(validator::Height(2), &payload).is_err());

    let h1 = app.commit(&block(validator::AppHash::default(), 1)).unwrap();
    assert_ne!(validator::AppHash::default(), h1);
    assert_eq!(Some(validator::Height(1)), app.last_height());

    // Gap.
    assert!(app.commit(&block(h1.clone(), 3)).is_err());
    // Block built on a different state.
    assert!(app.commit(&block(validator::AppHash::default(), 2)).is_err());
    let h2 = app.commit(&block(h1.clone(), 2)).unwrap();
    assert_ne!(h1, h2);

    // Execution is deterministic.
    let other = HashChainApp::default();
    assert_eq!(h1, other.commit(&block(validator::AppHash::default(), 1)).unwrap());
    assert_eq!(h2, other.commit(&block(h1, 2)).unwrap());
}

#[tokio::test(start_paused = true)]
async fn node_recovers_its_chain_after_restart() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let dir = tempfile::tempdir().unwrap();
    let (cfg, key) = AppConfig::default_for("keel-test", dir.path()).unwrap();
    let configs = crate::Configs {
        app: cfg,
        validator_key: key,
    };

    let app = Arc::new(HashChainApp::default());
    let (network, _broadcast) = ctx::channel::unbounded();
    let (handle, runner) = configs
        .bft_config(app.clone())
        .unwrap()
        .recover(ctx, network)
        .unwrap();
    tokio::select! {
        res = runner.run(ctx) => panic!("runner terminated: {res:?}"),
        res = handle.wait_for_block(ctx, validator::Height(3)) => res.unwrap(),
    }
    assert_eq!(Some(validator::Height(3)), app.last_height());
    assert!(configs.app.sign_record_path.exists());

    // The restarted node executes the logged blocks again.
    let restarted = Arc::new(HashChainApp::default());
    let (network, _broadcast) = ctx::channel::unbounded();
    let (handle, _runner) = configs
        .bft_config(restarted.clone())
        .unwrap()
        .recover(ctx, network)
        .unwrap();
    assert_eq!(Some(validator::Height(3)), restarted.last_height());
    assert_eq!(validator::Height(4), handle.round_state().height);
}
