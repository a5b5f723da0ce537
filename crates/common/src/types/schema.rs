use serde::{Deserialize, Serialize};

/// Field metadata of one object type as returned by the describe endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescribe {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDescribe>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Id,
    String,
    Textarea,
    Picklist,
    Multipicklist,
    Reference,
    Boolean,
    Double,
    Currency,
    Percent,
    Int,
    Date,
    Datetime,
    Email,
    Phone,
    Url,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescribe {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub nillable: bool,
    #[serde(default)]
    pub createable: bool,
    #[serde(default)]
    pub updateable: bool,
    #[serde(default)]
    pub external_id: bool,
    #[serde(default)]
    pub defaulted_on_create: bool,
    #[serde(default)]
    pub reference_to: Vec<String>,
    #[serde(default)]
    pub picklist_values: Vec<PicklistValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicklistValue {
    pub value: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl FieldDescribe {
    /// Minimal describe entry, handy when assembling schemas by hand.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nillable: true,
            createable: true,
            updateable: true,
            external_id: false,
            defaulted_on_create: false,
            reference_to: Vec::new(),
            picklist_values: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.nillable = false;
        self
    }

    pub fn external_id(mut self) -> Self {
        self.external_id = true;
        self
    }

    pub fn with_picklist<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.picklist_values = values
            .into_iter()
            .map(|v| PicklistValue {
                value: v.into(),
                active: true,
            })
            .collect();
        self
    }

    pub fn is_required_on_create(&self) -> bool {
        self.createable && !self.nillable && !self.defaulted_on_create
    }

    pub fn is_picklist(&self) -> bool {
        matches!(self.field_type, FieldType::Picklist | FieldType::Multipicklist)
    }
}

impl ObjectDescribe {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescribe>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescribe> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Active enumerated values of `field`; `None` when the field is not a picklist.
    pub fn allowed_values(&self, field: &str) -> Option<Vec<&str>> {
        let f = self.field(field).filter(|f| f.is_picklist())?;
        Some(
            f.picklist_values
                .iter()
                .filter(|v| v.active)
                .map(|v| v.value.as_str())
                .collect(),
        )
    }
}
