use super::*;
use crate::fixtures::{builtin, harness, selection, Harness, SOURCE, TARGET};
use serde_json::json;
use test_utils::{record, PlatformCall};

async fn validate(h: &Harness, template: &MigrationTemplate, selected: &Selection) -> ValidationResult {
    ValidationEngine::new(h.client.clone(), 200)
        .validate(template, &h.source(), &h.target(), selected, &h.resolver())
        .await
}

#[tokio::test]
async fn clean_selection_is_valid() {
    let h = harness();
    h.seed_accounts(&[("SA1", Some("Acme")), ("SA2", Some("Globex"))]);
    let result = validate(
        &h,
        &builtin("account-contact"),
        &selection("Account", &["SA1", "SA2"]),
    )
    .await;
    assert!(result.is_valid, "{:?}", result.issues);
    assert!(result.issues.is_empty());
    assert!(h.platform.load_calls().is_empty());
}

#[tokio::test]
async fn large_selection_warns_first_without_invalidating() {
    let h = harness();
    h.seed_accounts(&[("SA1", Some("Acme")), ("SA2", Some("Globex"))]);
    let result = ValidationEngine::new(h.client.clone(), 1)
        .validate(
            &builtin("account-contact"),
            &h.source(),
            &h.target(),
            &selection("Account", &["SA1", "SA2"]),
            &h.resolver(),
        )
        .await;
    assert!(result.is_valid);
    assert_eq!(result.issues[0].check, CheckKind::SelectionSize);
    assert_eq!(result.issues[0].severity, Severity::Warning);
    assert!(result.issues[0].remediation.is_some());
}

#[tokio::test]
async fn unreachable_org_short_circuits() {
    let h = harness();
    h.seed_accounts(&[("SA1", Some("Acme"))]);
    h.platform.set_unreachable(TARGET, true);
    let result = validate(&h, &builtin("account-contact"), &selection("Account", &["SA1"])).await;

    assert!(!result.is_valid);
    let connectivity: Vec<&ValidationIssue> = result.by_check(CheckKind::Connectivity).collect();
    assert_eq!(connectivity.len(), 1);
    assert!(connectivity[0].message.contains("org target"));
    assert_eq!(result.issues.len(), 1);
    assert!(!h
        .platform
        .calls()
        .iter()
        .any(|c| matches!(c, PlatformCall::Query { .. })));
}

#[tokio::test]
async fn missing_records_skip_the_downstream_checks() {
    let h = harness();
    h.platform.insert_records(
        SOURCE,
        "Account",
        vec![record(json!({"Id": "SA1", "Name": "Acme", "Industry": "Mining"}))],
    );
    let result = validate(
        &h,
        &builtin("account-contact"),
        &selection("Account", &["SA1", "SA404"]),
    )
    .await;

    assert!(!result.is_valid);
    let missing: Vec<&ValidationIssue> = result.by_check(CheckKind::Existence).collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].record_id.as_deref(), Some("SA404"));
    assert_eq!(result.by_check(CheckKind::Picklist).count(), 0);
    assert_eq!(result.by_check(CheckKind::Dependency).count(), 0);
}

#[tokio::test]
async fn integrity_predicates_report_with_their_severity() {
    let h = harness();
    let long_name = "x".repeat(300);
    h.seed_accounts(&[("SA1", None), ("SA2", Some(long_name.as_str()))]);
    let result = validate(
        &h,
        &builtin("account-contact"),
        &selection("Account", &["SA1", "SA2"]),
    )
    .await;

    assert!(!result.is_valid);
    let findings: Vec<(Severity, Option<&str>)> = result
        .by_check(CheckKind::Integrity)
        .map(|i| (i.severity, i.record_id.as_deref()))
        .collect();
    assert_eq!(
        findings,
        vec![(Severity::Error, Some("SA1")), (Severity::Warning, Some("SA2"))]
    );
}

#[tokio::test]
async fn picklist_values_outside_the_target_set_are_errors() {
    let h = harness();
    h.platform.insert_records(
        SOURCE,
        "Account",
        vec![
            record(json!({"Id": "SA1", "Name": "Acme", "Industry": "Energy", "Type": "Customer"})),
            record(json!({"Id": "SA2", "Name": "Globex", "Industry": "Mining"})),
        ],
    );
    let result = validate(
        &h,
        &builtin("account-contact"),
        &selection("Account", &["SA1", "SA2"]),
    )
    .await;

    assert!(!result.is_valid);
    let picklist: Vec<&ValidationIssue> = result.by_check(CheckKind::Picklist).collect();
    assert_eq!(picklist.len(), 1);
    assert_eq!(picklist[0].record_id.as_deref(), Some("SA2"));
    assert_eq!(picklist[0].field.as_deref(), Some("Industry"));
    assert!(picklist[0].message.contains("'Mining'"));
}

#[tokio::test]
async fn references_must_be_selected_or_already_in_the_target() {
    let h = harness();
    h.seed_accounts(&[("SA1", Some("Acme"))]);
    h.seed_contacts(&[
        ("SC1", "Lovelace", "SA1"),
        ("SC2", "Hopper", "SA7"),
        ("SC3", "Turing", "SA8"),
    ]);
    h.platform.insert_records(
        TARGET,
        "Account",
        vec![record(json!({"Id": "T0001", "Name": "Initech", "External_ID__c": "SA7"}))],
    );
    let mut selected = selection("Account", &["SA1"]);
    selected.insert("Contact".into(), vec!["SC1".into(), "SC2".into(), "SC3".into()]);

    let result = validate(&h, &builtin("account-contact"), &selected).await;

    assert!(!result.is_valid);
    let deps: Vec<&ValidationIssue> = result.by_check(CheckKind::Dependency).collect();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].record_id.as_deref(), Some("SC3"));
    assert_eq!(deps[0].field.as_deref(), Some("AccountId"));
    assert!(deps[0].message.contains("SA8"));
}

#[tokio::test]
async fn references_loaded_only_by_a_later_step_are_unresolved() {
    let h = harness();
    h.seed_accounts(&[("SA1", Some("Acme"))]);
    h.seed_contacts(&[("SC1", "Lovelace", "SA1")]);
    let mut template = builtin("account-contact");
    template.steps[1].depends_on.clear();
    template.steps[0].depends_on = vec!["contacts".into()];
    let mut selected = selection("Account", &["SA1"]);
    selected.insert("Contact".into(), vec!["SC1".into()]);

    let in_order = validate(&h, &builtin("account-contact"), &selected).await;
    assert_eq!(in_order.by_check(CheckKind::Dependency).count(), 0);

    let result = validate(&h, &template, &selected).await;
    assert!(!result.is_valid);
    let deps: Vec<&ValidationIssue> = result.by_check(CheckKind::Dependency).collect();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].record_id.as_deref(), Some("SC1"));
    assert!(deps[0].message.contains("SA1"));
}
