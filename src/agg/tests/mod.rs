use super::*;

#[test]
fn all_nan_window_folds_to_nan() {
    let window = [f64::NAN, f64::NAN, f64::NAN];
    assert!(safe_avg(&window).is_nan());
    assert!(safe_sum(&window).is_nan());
    assert!(safe_max(&window).is_nan());
    assert!(safe_min(&window).is_nan());
    assert!(safe_last(&window).is_nan());
}

#[test]
fn avg_ignores_nan() {
    let window = [1.0, f64::NAN, 3.0];
    assert_eq!(safe_avg(&window), 2.0);
}

#[test]
fn sum_ignores_nan() {
    assert_eq!(safe_sum(&[1.0, f64::NAN, 3.0]), 4.0);
}

#[test]
fn max_and_min_ignore_nan() {
    assert_eq!(safe_max(&[1.0, f64::NAN, 3.0, 2.0]), 3.0);
    assert_eq!(safe_min(&[1.0, f64::NAN, 3.0, 2.0]), 1.0);
}

#[test]
fn last_returns_last_non_nan() {
    assert_eq!(safe_last(&[1.0, 2.0, f64::NAN]), 2.0);
}

#[test]
fn rules_first_match_wins() {
    let rules = vec![
        AggRuleConfig {
            pattern: "^stats_counts\\.".to_string(),
            method: "sum".to_string(),
        },
        AggRuleConfig {
            pattern: "\\.max$".to_string(),
            method: "max".to_string(),
        },
    ];
    let agg = AggRules::new(&rules, "avg").unwrap();
    assert_eq!(agg.get_method("stats_counts.foo"), AggMethod::Sum);
    assert_eq!(agg.get_method("foo.max"), AggMethod::Max);
    assert_eq!(agg.get_method("unrelated.metric"), AggMethod::Avg);
}

#[test]
fn unknown_method_errors() {
    let rules = vec![AggRuleConfig {
        pattern: ".*".to_string(),
        method: "bogus".to_string(),
    }];
    assert!(matches!(
        AggRules::new(&rules, "avg"),
        Err(AggError::UnknownMethod(_))
    ));
}

#[test]
fn bad_pattern_errors() {
    let rules = vec![AggRuleConfig {
        pattern: "(unterminated".to_string(),
        method: "avg".to_string(),
    }];
    assert!(matches!(
        AggRules::new(&rules, "avg"),
        Err(AggError::BadPattern { .. })
    ));
}

#[test]
fn get_methods_batches_lookup() {
    let rules = vec![AggRuleConfig {
        pattern: "^sum\\.".to_string(),
        method: "sum".to_string(),
    }];
    let agg = AggRules::new(&rules, "avg").unwrap();
    let methods = agg.get_methods(["sum.a", "other.b"]);
    assert_eq!(methods, vec![AggMethod::Sum, AggMethod::Avg]);
}
