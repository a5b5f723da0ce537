use serde_json::{Map, Value};

/// Name of the platform-assigned primary identifier on every record.
pub const ID_FIELD: &str = "Id";

/// A platform record: field name to JSON value.
pub type Record = Map<String, Value>;

pub trait RecordExt {
    fn id(&self) -> Option<&str>;
    fn str_field(&self, name: &str) -> Option<&str>;
    /// Renders scalar values as text; `None` for null, missing or nested values.
    fn text_field(&self, name: &str) -> Option<String>;
}

impl RecordExt for Record {
    fn id(&self) -> Option<&str> {
        self.str_field(ID_FIELD)
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    fn text_field(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_field_renders_scalars_only() {
        let record: Record = serde_json::from_value(json!({
            "Id": "001A",
            "Amount": 12.5,
            "IsActive": true,
            "attributes": {"type": "Account"},
            "Description": null
        }))
        .expect("record");

        assert_eq!(record.id(), Some("001A"));
        assert_eq!(record.text_field("Amount").as_deref(), Some("12.5"));
        assert_eq!(record.text_field("IsActive").as_deref(), Some("true"));
        assert_eq!(record.text_field("attributes"), None);
        assert_eq!(record.text_field("Description"), None);
        assert_eq!(record.text_field("Missing"), None);
    }
}
