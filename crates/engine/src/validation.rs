use crate::context::Selection;
use crate::external_id::ExternalIdResolver;
use common::types::{OrgId, Record, RecordExt, Severity, ID_FIELD};
use dag::StepDag;
use log::{debug, info};
use serde::Serialize;
use shared_clients::{PlatformError, RateLimitedClient};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use templates::{quote_list, EtlStep, MigrationTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    SelectionSize,
    Connectivity,
    Existence,
    Integrity,
    Dependency,
    Picklist,
}

impl Display for CheckKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckKind::SelectionSize => "selection_size",
            CheckKind::Connectivity => "connectivity",
            CheckKind::Existence => "existence",
            CheckKind::Integrity => "integrity",
            CheckKind::Dependency => "dependency",
            CheckKind::Picklist => "picklist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub check: CheckKind,
    pub message: String,
    pub record_id: Option<String>,
    pub field: Option<String>,
    pub remediation: Option<String>,
}

impl ValidationIssue {
    fn new(severity: Severity, check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            check,
            message: message.into(),
            record_id: None,
            field: None,
            remediation: None,
        }
    }

    fn error(check: CheckKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, check, message)
    }

    fn record(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: !issues.iter().any(ValidationIssue::is_error),
            issues,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn by_check(&self, check: CheckKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.check == check)
    }
}

/// Selected source records, fetched once and shared by the later checks.
type Fetched = BTreeMap<String, Vec<Record>>;

/// Pre-flight checks for one prospective run. Nothing here writes.
pub struct ValidationEngine {
    client: Arc<RateLimitedClient>,
    large_selection_threshold: usize,
}

struct Run<'a> {
    template: &'a MigrationTemplate,
    source: &'a OrgId,
    target: &'a OrgId,
    selected: &'a Selection,
    resolver: &'a ExternalIdResolver,
    issues: Vec<ValidationIssue>,
}

fn auth_hint(err: &PlatformError, org: &OrgId) -> String {
    if err.requires_reconnect() {
        format!("reconnect org {org} through the OAuth consent flow")
    } else {
        format!("check that org {org} is reachable and its credentials are current")
    }
}

impl ValidationEngine {
    pub fn new(client: Arc<RateLimitedClient>, large_selection_threshold: usize) -> Self {
        Self {
            client,
            large_selection_threshold,
        }
    }

    /// Connectivity, existence, dependency and picklist checks, in that
    /// order. A connectivity or existence failure skips the checks after it.
    pub async fn validate(
        &self,
        template: &MigrationTemplate,
        source: &OrgId,
        target: &OrgId,
        selected: &Selection,
        resolver: &ExternalIdResolver,
    ) -> ValidationResult {
        let mut run = Run {
            template,
            source,
            target,
            selected,
            resolver,
            issues: Vec::new(),
        };

        let count: usize = selected.values().map(Vec::len).sum();
        if count > self.large_selection_threshold {
            run.issues.push(
                ValidationIssue::new(
                    Severity::Warning,
                    CheckKind::SelectionSize,
                    format!("{count} records selected"),
                )
                .remediation(format!(
                    "split the migration into batches of at most {} records",
                    self.large_selection_threshold
                )),
            );
        }

        if !self.connectivity(&mut run).await {
            return self.finish(run);
        }
        let Some(fetched) = self.existence(&mut run).await else {
            return self.finish(run);
        };
        self.integrity(&mut run, &fetched);
        self.dependencies(&mut run, &fetched).await;
        self.picklists(&mut run, &fetched).await;
        self.finish(run)
    }

    fn finish(&self, run: Run<'_>) -> ValidationResult {
        let result = ValidationResult::from_issues(run.issues);
        info!(
            "validated template={} valid={} issues={}",
            run.template.id,
            result.is_valid,
            result.issues.len()
        );
        result
    }

    async fn connectivity(&self, run: &mut Run<'_>) -> bool {
        let mut reachable = true;
        for org in [run.source, run.target] {
            if let Err(err) = self.client.identity(org).await {
                reachable = false;
                run.issues.push(
                    ValidationIssue::error(CheckKind::Connectivity, format!("org {org}: {err}"))
                        .remediation(auth_hint(&err, org)),
                );
            }
        }
        reachable
    }

    /// Fields the later checks read from records of `object_type`.
    fn fields_for(run: &Run<'_>, object_type: &str) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        for step in steps_for(run.template, object_type) {
            if let Some(v) = &step.validation {
                fields.extend(v.integrity.iter().map(|c| c.predicate.field().to_string()));
                fields.extend(v.dependencies.iter().map(|d| d.field.clone()));
                fields.extend(v.picklists.iter().map(|p| p.field.clone()));
            }
        }
        fields.remove(ID_FIELD);
        fields
    }

    /// One query per selected object type; `None` when anything is missing.
    async fn existence(&self, run: &mut Run<'_>) -> Option<Fetched> {
        let mut fetched = Fetched::new();
        let mut complete = true;
        for (object_type, ids) in run.selected {
            if ids.is_empty() {
                continue;
            }
            let describe = match run.resolver.describe(run.source, object_type).await {
                Ok(d) => d,
                Err(err) => {
                    run.issues
                        .push(ValidationIssue::error(CheckKind::Existence, err.to_string()));
                    complete = false;
                    continue;
                }
            };
            let mut projection = vec![ID_FIELD.to_string()];
            projection.extend(
                Self::fields_for(run, object_type)
                    .into_iter()
                    .filter(|f| describe.has_field(f)),
            );
            let soql = format!(
                "SELECT {} FROM {object_type} WHERE Id IN ({})",
                projection.join(", "),
                quote_list(ids)
            );
            let records = match self.client.query(run.source, &soql).await {
                Ok(records) => records,
                Err(err) => {
                    run.issues.push(ValidationIssue::error(
                        CheckKind::Existence,
                        format!("could not read selected {object_type} records: {err}"),
                    ));
                    complete = false;
                    continue;
                }
            };

            let found: BTreeSet<&str> = records.iter().filter_map(|r| r.id()).collect();
            for id in ids.iter().filter(|id| !found.contains(id.as_str())) {
                complete = false;
                run.issues.push(
                    ValidationIssue::error(
                        CheckKind::Existence,
                        format!("{object_type} {id} does not exist in org {}", run.source),
                    )
                    .record(id)
                    .remediation("remove the record from the selection"),
                );
            }
            debug!("existence object={object_type} selected={} found={}", ids.len(), found.len());
            fetched.insert(object_type.clone(), records);
        }
        complete.then_some(fetched)
    }

    fn integrity(&self, run: &mut Run<'_>, fetched: &Fetched) {
        for step in &run.template.steps {
            let Some(validation) = &step.validation else {
                continue;
            };
            for record in records_for(fetched, step) {
                let id = record.id().unwrap_or_default();
                for check in &validation.integrity {
                    if let Err(reason) = check.predicate.evaluate(record) {
                        run.issues.push(
                            ValidationIssue::new(
                                check.severity,
                                CheckKind::Integrity,
                                format!("{}: {reason}", check.name),
                            )
                            .record(id)
                            .field(check.predicate.field()),
                        );
                    }
                }
            }
        }
    }

    /// A reference passes when the referenced record is selected for a step
    /// that loads its type and runs earlier, or already exists in the target
    /// org keyed by its source id.
    async fn dependencies(&self, run: &mut Run<'_>, fetched: &Fetched) {
        let order = run_order(run.template);
        // (referenced type) -> [(record id, field, referenced id)]
        let mut unresolved: BTreeMap<String, Vec<(String, String, String)>> = BTreeMap::new();
        for step in &run.template.steps {
            let Some(validation) = &step.validation else {
                continue;
            };
            let position = order.iter().position(|s| s.name == step.name);
            for check in &validation.dependencies {
                let produced = position.is_some_and(|position| {
                    order[..position]
                        .iter()
                        .any(|s| s.load.object_type == check.object_type)
                });
                let selected = run
                    .selected
                    .get(&check.object_type)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for record in records_for(fetched, step) {
                    let Some(reference) = record.text_field(&check.field) else {
                        continue;
                    };
                    if produced && selected.contains(&reference) {
                        continue;
                    }
                    unresolved.entry(check.object_type.clone()).or_default().push((
                        record.id().unwrap_or_default().to_string(),
                        check.field.clone(),
                        reference,
                    ));
                }
            }
        }

        for (object_type, refs) in unresolved {
            let key = match run.resolver.resolve(run.target, &object_type).await {
                Ok(key) => key,
                Err(err) => {
                    run.issues
                        .push(ValidationIssue::error(CheckKind::Dependency, err.to_string()));
                    continue;
                }
            };
            let wanted: BTreeSet<&str> = refs.iter().map(|(_, _, r)| r.as_str()).collect();
            let wanted: Vec<&str> = wanted.into_iter().collect();
            let soql = format!(
                "SELECT Id, {} FROM {object_type} WHERE {} IN ({})",
                key.field,
                key.field,
                quote_list(&wanted)
            );
            let existing: BTreeSet<String> = match self.client.query(run.target, &soql).await {
                Ok(records) => records
                    .iter()
                    .filter_map(|r| r.text_field(&key.field))
                    .collect(),
                Err(err) => {
                    run.issues.push(ValidationIssue::error(
                        CheckKind::Dependency,
                        format!("could not look up {object_type} in org {}: {err}", run.target),
                    ));
                    continue;
                }
            };
            for (record_id, field, reference) in refs {
                if existing.contains(&reference) {
                    continue;
                }
                run.issues.push(
                    ValidationIssue::error(
                        CheckKind::Dependency,
                        format!(
                            "{field} references {object_type} {reference}, which no earlier step loads and org {} does not hold",
                            run.target
                        ),
                    )
                    .record(record_id)
                    .field(field)
                    .remediation(format!(
                        "select {object_type} {reference} for a step that runs before this one"
                    )),
                );
            }
        }
    }

    async fn picklists(&self, run: &mut Run<'_>, fetched: &Fetched) {
        for step in &run.template.steps {
            let Some(validation) = &step.validation else {
                continue;
            };
            let records = records_for(fetched, step);
            if validation.picklists.is_empty() || records.is_empty() {
                continue;
            }
            for check in &validation.picklists {
                let org = if check.validate_against_target {
                    run.target
                } else {
                    run.source
                };
                let describe = match run.resolver.describe(org, &step.load.object_type).await {
                    Ok(d) => d,
                    Err(err) => {
                        run.issues
                            .push(ValidationIssue::error(CheckKind::Picklist, err.to_string()));
                        continue;
                    }
                };
                let Some(allowed) = describe.allowed_values(&check.field) else {
                    run.issues.push(
                        ValidationIssue::new(
                            Severity::Warning,
                            CheckKind::Picklist,
                            format!(
                                "{}.{} is not a picklist in org {org}",
                                step.load.object_type, check.field
                            ),
                        )
                        .field(&check.field),
                    );
                    continue;
                };
                for record in records {
                    let Some(value) = record.text_field(&check.field) else {
                        continue;
                    };
                    if value.is_empty() || allowed.contains(&value.as_str()) {
                        continue;
                    }
                    run.issues.push(
                        ValidationIssue::error(
                            CheckKind::Picklist,
                            format!(
                                "'{value}' is not an allowed {}.{} value in org {org}",
                                step.load.object_type, check.field
                            ),
                        )
                        .record(record.id().unwrap_or_default())
                        .field(&check.field)
                        .remediation(format!(
                            "add '{value}' to the picklist in org {org} or change the record"
                        )),
                    );
                }
            }
        }
    }
}

fn steps_for<'a>(
    template: &'a MigrationTemplate,
    object_type: &'a str,
) -> impl Iterator<Item = &'a EtlStep> {
    template
        .steps
        .iter()
        .filter(move |s| s.extract.object_type == object_type)
}

/// Steps in execution order. A template whose graph does not build keeps
/// its declared order; the executor reports the graph error itself.
fn run_order(template: &MigrationTemplate) -> Vec<&EtlStep> {
    match StepDag::build(template).and_then(|dag| dag.execution_order()) {
        Ok(order) => order,
        Err(err) => {
            debug!("template={} falling back to declared step order: {err}", template.id);
            template.steps.iter().collect()
        }
    }
}

fn records_for<'a>(fetched: &'a Fetched, step: &EtlStep) -> &'a [Record] {
    fetched
        .get(&step.extract.object_type)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests;
