use crate::error::TemplateError;
use crate::models::ExtractSpec;
use minijinja::{context, Environment, UndefinedBehavior};

/// Values substituted into an extraction query.
///
/// * `external_id_field` - the resolved join-key field in the source org.
/// * `ids` - the selection for the step's object type; when nothing was
///   selected directly this falls back to `parent_ids`.
/// * `parent_ids` - source ids the step's dependencies mapped successfully.
#[derive(Debug, Clone, Default)]
pub struct QueryVars {
    pub external_id_field: String,
    pub ids: Vec<String>,
    pub parent_ids: Vec<String>,
}

impl QueryVars {
    pub fn effective_ids(&self) -> &[String] {
        if self.ids.is_empty() {
            &self.parent_ids
        } else {
            &self.ids
        }
    }
}

/// Escapes a value for use inside a single-quoted query literal.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// `'a','b','c'` for use in an `IN (...)` clause.
pub fn quote_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| quote_literal(v.as_ref()))
        .collect::<Vec<String>>()
        .join(",")
}

pub fn render_extract_query(spec: &ExtractSpec, vars: &QueryVars) -> Result<String, TemplateError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let ctx = context! {
        external_id_field => vars.external_id_field.as_str(),
        ids => quote_list(vars.effective_ids()),
        parent_ids => quote_list(&vars.parent_ids),
        object_type => spec.object_type.as_str(),
    };
    let rendered = env.render_str(&spec.query, &ctx)?;

    match &spec.filter {
        Some(filter) if !filter.trim().is_empty() => {
            let filter = env.render_str(filter, &ctx)?;
            Ok(append_filter(&rendered, &filter))
        }
        _ => Ok(rendered),
    }
}

fn append_filter(query: &str, filter: &str) -> String {
    let has_where = query
        .split_whitespace()
        .any(|token| token.eq_ignore_ascii_case("where"));
    if has_where {
        format!("{query} AND ({filter})")
    } else {
        format!("{query} WHERE {filter}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    fn spec(query: &str, filter: Option<&str>) -> ExtractSpec {
        ExtractSpec {
            object_type: "Contact".into(),
            query: query.into(),
            filter: filter.map(str::to_owned),
        }
    }

    #[test]
    fn renders_ids_and_external_id_field() {
        let vars = QueryVars {
            external_id_field: "dcr__External_ID__c".into(),
            ids: vec!["003A".into(), "003B".into()],
            parent_ids: vec![],
        };
        let query = render_extract_query(
            &spec(
                "SELECT Id, {{ external_id_field }} FROM {{ object_type }} WHERE Id IN ({{ ids }})",
                Some("IsDeleted = false"),
            ),
            &vars,
        )
        .expect("render");
        assert_eq!(
            query,
            "SELECT Id, dcr__External_ID__c FROM Contact WHERE Id IN ('003A','003B') AND (IsDeleted = false)"
        );
    }

    #[test]
    fn ids_fall_back_to_parent_ids() {
        let vars = QueryVars {
            external_id_field: "External_ID__c".into(),
            ids: vec![],
            parent_ids: vec!["001A".into()],
        };
        let query = render_extract_query(
            &spec("SELECT Id FROM Contact", Some("AccountId IN ({{ ids }})")),
            &vars,
        )
        .expect("render");
        assert_eq!(query, "SELECT Id FROM Contact WHERE AccountId IN ('001A')");

        let query = render_extract_query(
            &spec("SELECT Id FROM Contact WHERE AccountId IN ({{ parent_ids }})", Some("Email != null")),
            &vars,
        )
        .expect("render");
        assert_eq!(
            query,
            "SELECT Id FROM Contact WHERE AccountId IN ('001A') AND (Email != null)"
        );
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote_list(&["O'Brien", "a\\b"]), r"'O\'Brien','a\\b'");
    }

    #[test]
    fn unknown_variables_fail_to_render() {
        let err = render_extract_query(&spec("SELECT {{ nope }} FROM Contact", None), &QueryVars::default())
            .expect_err("strict undefined");
        assert_matches!(err, TemplateError::Render { .. });
    }
}
