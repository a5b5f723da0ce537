use crate::error::{RecordError, RecordErrorKind};
use crate::mapping::RecordMapping;
use common::types::{Record, RecordExt};
use serde_json::Value as Json;
use templates::{
    is_blank, ComputedFn, FieldMapping, Transformation, TransformSpec, EXTERNAL_ID_PLACEHOLDER,
};

fn direct(record: &Record, source_field: Option<&str>) -> Json {
    source_field
        .and_then(|f| record.get(f))
        .cloned()
        .unwrap_or(Json::Null)
}

/// Swaps a source reference for the target id it was migrated to. An empty
/// reference stays empty.
fn lookup(
    record: &Record,
    source_field: Option<&str>,
    object_type: &str,
    mapping: &RecordMapping,
) -> Result<Json, String> {
    let Some(reference) = source_field.and_then(|f| record.text_field(f)) else {
        return Ok(Json::Null);
    };
    if reference.trim().is_empty() {
        return Ok(Json::Null);
    }
    match mapping.get(&reference) {
        Some(mapped) if mapped.object_type == object_type => {
            Ok(Json::String(mapped.target_id.clone()))
        }
        Some(mapped) => Err(format!(
            "{reference} was migrated as {} but a {object_type} is expected",
            mapped.object_type
        )),
        None => Err(format!(
            "{object_type} {reference} has not been migrated to the target org"
        )),
    }
}

fn constant(value: &Json) -> Json {
    value.clone()
}

fn computed(record: &Record, function: &ComputedFn) -> Json {
    function.evaluate(record)
}

fn target_field<'a>(mapping: &'a FieldMapping, load_field: &'a str) -> &'a str {
    if mapping.target_field == EXTERNAL_ID_PLACEHOLDER {
        load_field
    } else {
        &mapping.target_field
    }
}

/// Applies every mapping of `spec` to one extracted record.
///
/// The `@external_id` target is written to `load_field`. Empty optional
/// values are left out of the row rather than sent as nulls.
pub fn transform_record(
    record: &Record,
    spec: &TransformSpec,
    load_field: &str,
    mapping: &RecordMapping,
) -> Result<Record, RecordError> {
    let record_id = record.id().unwrap_or("<missing Id>");
    let mut row = Record::new();

    for field in &spec.mappings {
        let source = field.source_field.as_deref();
        let value = match &field.transform {
            Transformation::Direct => direct(record, source),
            Transformation::Lookup { object_type } => lookup(record, source, object_type, mapping)
                .map_err(|reason| {
                    RecordError::new(
                        record_id,
                        RecordErrorKind::DependencyUnresolved,
                        format!("{}: {reason}", field.target_field),
                    )
                })?,
            Transformation::Constant { value } => constant(value),
            Transformation::Computed { function } => computed(record, function),
        };

        let target = target_field(field, load_field);
        if is_blank(&value) {
            if field.required {
                return Err(RecordError::new(
                    record_id,
                    RecordErrorKind::InvalidRecord,
                    format!("required field {target} has no value"),
                ));
            }
            continue;
        }
        row.insert(target.to_string(), value);
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappedRecord;
    use serde_json::json;
    use test_utils::record;

    fn spec() -> TransformSpec {
        TransformSpec {
            mappings: vec![
                FieldMapping::external_id(),
                FieldMapping::direct("LastName", "LastName").required(),
                FieldMapping::direct("Email", "Email"),
                FieldMapping::lookup("AccountId", "AccountId", "Account"),
                FieldMapping {
                    source_field: None,
                    target_field: "LeadSource".into(),
                    transform: Transformation::Constant {
                        value: json!("Org Migration"),
                    },
                    required: false,
                },
                FieldMapping {
                    source_field: None,
                    target_field: "Title".into(),
                    transform: Transformation::Computed {
                        function: ComputedFn::Upper {
                            field: "Title".into(),
                        },
                    },
                    required: false,
                },
            ],
        }
    }

    fn mapping() -> RecordMapping {
        let mut mapping = RecordMapping::default();
        mapping.insert(
            "001S1",
            MappedRecord {
                object_type: "Account".into(),
                target_id: "001T1".into(),
                step: "accounts".into(),
            },
        );
        mapping
    }

    #[test]
    fn maps_every_kind_and_writes_the_target_key() {
        let source = record(json!({
            "Id": "003S1", "LastName": "Lovelace", "Email": null,
            "AccountId": "001S1", "Title": "cto"
        }));
        let row = transform_record(&source, &spec(), "External_ID__c", &mapping()).expect("row");
        assert_eq!(
            serde_json::Value::Object(row),
            json!({
                "External_ID__c": "003S1",
                "LastName": "Lovelace",
                "AccountId": "001T1",
                "LeadSource": "Org Migration",
                "Title": "CTO"
            })
        );
    }

    #[test]
    fn unmapped_reference_is_unresolved_never_the_source_id() {
        let source = record(json!({"Id": "003S2", "LastName": "Hopper", "AccountId": "001S9"}));
        let err = transform_record(&source, &spec(), "External_ID__c", &mapping())
            .expect_err("unresolved");
        assert_eq!(err.kind, RecordErrorKind::DependencyUnresolved);
        assert_eq!(err.record_id, "003S2");
        assert!(err.message.contains("001S9"));
    }

    #[test]
    fn reference_of_the_wrong_type_is_unresolved() {
        let mut spec = spec();
        spec.mappings[3] = FieldMapping::lookup("AccountId", "AccountId", "Partner__c");
        let source = record(json!({"Id": "003S3", "LastName": "Hopper", "AccountId": "001S1"}));
        let err = transform_record(&source, &spec, "External_ID__c", &mapping())
            .expect_err("wrong type");
        assert_eq!(err.kind, RecordErrorKind::DependencyUnresolved);
    }

    #[test]
    fn blank_required_value_rejects_the_record() {
        let source = record(json!({"Id": "003S4", "LastName": "  "}));
        let err = transform_record(&source, &spec(), "External_ID__c", &mapping())
            .expect_err("invalid");
        assert_eq!(err.kind, RecordErrorKind::InvalidRecord);
        assert!(err.message.contains("LastName"));
    }
}
