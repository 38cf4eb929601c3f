use super::support::{index_id, input};
use nova_config::{NovaIndexConfig, ValueValidationSetting};
use nova_index::{
    check_value, CancellationToken, DataIndexer, IndexOptions, IndexParts, MapError,
    MapReduceIndex, UpdateError, ValueValidation, ViolationKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `note` does not survive serialization but participates in equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Annotated {
    line: u32,
    #[serde(skip)]
    note: u32,
}

struct AnnotatingIndexer;

impl DataIndexer<str> for AnnotatingIndexer {
    type Key = String;
    type Value = Annotated;

    fn map(
        &self,
        content: &str,
        _cancel: &CancellationToken,
    ) -> Result<HashMap<String, Annotated>, MapError> {
        Ok(content
            .lines()
            .enumerate()
            .map(|(line, text)| {
                (
                    text.to_string(),
                    Annotated {
                        line: line as u32,
                        note: text.len() as u32,
                    },
                )
            })
            .collect())
    }
}

fn index(validation: ValueValidation) -> MapReduceIndex<AnnotatingIndexer, str> {
    MapReduceIndex::builder(index_id("annotated"), AnnotatingIndexer, IndexParts::in_memory())
        .value_validation(validation)
        .build()
}

#[test]
fn strict_mode_rejects_lossy_values() {
    let index = index(ValueValidation::Strict);

    let err = index
        .update(input(5), Some("hello"), &CancellationToken::new())
        .err();

    let Some(UpdateError::ContractViolation(violation)) = err else {
        panic!("expected a contract violation, got {err:?}");
    };
    assert_eq!(violation.index.as_str(), "annotated");
    assert_eq!(violation.input, input(5));
    assert_eq!(violation.kind, ViolationKind::NotEqual);
    assert!(violation.value.contains("note: 5"), "{}", violation.value);
    assert_eq!(index.modification_stamp(), 0);
}

#[test]
fn log_mode_commits_anyway() {
    let index = index(ValueValidation::Log);

    let changed = index
        .update(input(1), Some("hello"), &CancellationToken::new())
        .unwrap()
        .apply()
        .unwrap();

    assert!(changed);
    assert_eq!(index.get_data(&"hello".to_string()).unwrap().len(), 1);
}

#[test]
fn empty_values_pass_strict_mode() {
    let index = index(ValueValidation::Strict);
    // No lines, no values to check.
    let pending = index.update(input(1), Some(""), &CancellationToken::new());
    assert!(pending.is_ok());
    assert!(check_value(&Annotated { line: 3, note: 0 }).is_ok());
}

#[test]
fn validation_mode_follows_config() {
    let text = r#"
        [index]
        value_validation = "off"
        compression = "zstd"
    "#;
    let (config, diagnostics) = NovaIndexConfig::load_from_str_with_diagnostics(text).unwrap();
    assert!(diagnostics.unknown_keys.is_empty());
    let options = IndexOptions::from_config(&config.index);

    assert_eq!(options.value_validation, ValueValidation::Off);
    assert_eq!(
        ValueValidation::from(ValueValidationSetting::Strict),
        ValueValidation::Strict
    );

    let index = index(options.value_validation);
    assert!(index
        .update(input(1), Some("hello"), &CancellationToken::new())
        .is_ok());
}
