use super::*;
use std::collections::HashMap;

#[test]
fn defaults_validate() {
    let cfg = Config::default();
    cfg.validate().expect("default config must validate");
}

#[test]
fn rejects_empty_data_dir() {
    let mut cfg = Config::default();
    cfg.data_dir = "  ".to_string();
    assert!(matches!(cfg.validate(), Err(ConfigError::Empty("data_dir"))));
}

#[test]
fn rejects_non_ascending_retentions() {
    let mut cfg = Config::default();
    cfg.retentions = vec![
        Retention {
            resolution: 60,
            retention: 100,
        },
        Retention {
            resolution: 10,
            retention: 100,
        },
    ];
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::InvalidRetentions(_))
    ));
}

#[test]
fn rejects_non_multiple_resolution() {
    let mut cfg = Config::default();
    cfg.retentions = vec![
        Retention {
            resolution: 10,
            retention: 100,
        },
        Retention {
            resolution: 25,
            retention: 1000,
        },
    ];
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::InvalidRetentions(_))
    ));
}

#[test]
fn env_override_data_dir_and_numeric_fields() {
    let mut cfg = Config::default();
    let mut vars = HashMap::new();
    vars.insert("HISSER_DATA_DIR".to_string(), "/tmp/hisser-data".to_string());
    vars.insert("HISSER_BUFFER_FLUSH_SIZE".to_string(), "120".to_string());
    vars.insert("HISSER_BUFFER_COMPACT_RATIO".to_string(), "1.5".to_string());
    cfg.apply_env_overrides_from(&vars).unwrap();
    assert_eq!(cfg.data_dir, "/tmp/hisser-data");
    assert_eq!(cfg.buffer_flush_size, 120);
    assert_eq!(cfg.buffer_compact_ratio, 1.5);
}

#[test]
fn env_override_invalid_numeric_errors() {
    let mut cfg = Config::default();
    let mut vars = HashMap::new();
    vars.insert("HISSER_BUFFER_FLUSH_SIZE".to_string(), "not-a-number".to_string());
    let err = cfg.apply_env_overrides_from(&vars).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { key: "HISSER_BUFFER_FLUSH_SIZE", .. }));
}

#[test]
fn env_override_retentions_parses_list() {
    let mut cfg = Config::default();
    let mut vars = HashMap::new();
    vars.insert("HISSER_RETENTIONS".to_string(), "10:86400,60:2592000".to_string());
    cfg.apply_env_overrides_from(&vars).unwrap();
    assert_eq!(cfg.retentions.len(), 2);
    assert_eq!(cfg.retentions[0].resolution, 10);
    assert_eq!(cfg.retentions[1].retention, 2592000);
}

#[test]
fn env_override_agg_rules_scanned_in_order() {
    let mut cfg = Config::default();
    let mut vars = HashMap::new();
    vars.insert("HISSER_AGG_RULE_0".to_string(), "^stats_counts\\.:sum".to_string());
    vars.insert("HISSER_AGG_RULE_1".to_string(), "\\.max$:max".to_string());
    cfg.apply_env_overrides_from(&vars).unwrap();
    assert_eq!(cfg.agg_rules.len(), 2);
    assert_eq!(cfg.agg_rules[0].method, "sum");
    assert_eq!(cfg.agg_rules[1].pattern, "\\.max$");
}
