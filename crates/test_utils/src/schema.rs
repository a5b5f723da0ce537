//! Describe results for the standard objects used in tests.

use common::types::{FieldDescribe, FieldType, ObjectDescribe};

pub fn id_field() -> FieldDescribe {
    let mut id = FieldDescribe::new("Id", FieldType::Id);
    id.createable = false;
    id.updateable = false;
    id.nillable = false;
    id
}

fn reference(name: &str, to: &str) -> FieldDescribe {
    let mut field = FieldDescribe::new(name, FieldType::Reference);
    field.reference_to = vec![to.to_string()];
    field
}

fn with_external_id(mut fields: Vec<FieldDescribe>, external_ids: &[&str]) -> Vec<FieldDescribe> {
    fields.extend(
        external_ids
            .iter()
            .map(|name| FieldDescribe::new(*name, FieldType::String).external_id()),
    );
    fields
}

pub fn account(external_ids: &[&str]) -> ObjectDescribe {
    let fields = vec![
        id_field(),
        FieldDescribe::new("Name", FieldType::String).required(),
        FieldDescribe::new("Industry", FieldType::Picklist)
            .with_picklist(["Energy", "Banking", "Retail"]),
        FieldDescribe::new("Type", FieldType::Picklist).with_picklist(["Customer", "Partner"]),
        FieldDescribe::new("Phone", FieldType::Phone),
        FieldDescribe::new("Website", FieldType::Url),
        FieldDescribe::new("BillingStreet", FieldType::Textarea),
        FieldDescribe::new("BillingCity", FieldType::String),
        FieldDescribe::new("BillingPostalCode", FieldType::String),
        FieldDescribe::new("BillingCountry", FieldType::String),
        FieldDescribe::new("Description", FieldType::Textarea),
        reference("OwnerId", "User"),
    ];
    ObjectDescribe::new("Account", with_external_id(fields, external_ids))
}

pub fn contact(external_ids: &[&str]) -> ObjectDescribe {
    let fields = vec![
        id_field(),
        FieldDescribe::new("FirstName", FieldType::String),
        FieldDescribe::new("LastName", FieldType::String).required(),
        FieldDescribe::new("Email", FieldType::Email),
        FieldDescribe::new("Phone", FieldType::Phone),
        FieldDescribe::new("Title", FieldType::String),
        FieldDescribe::new("LeadSource", FieldType::Picklist)
            .with_picklist(["Web", "Phone Inquiry", "Partner Referral"]),
        reference("AccountId", "Account"),
    ];
    ObjectDescribe::new("Contact", with_external_id(fields, external_ids))
}

pub fn opportunity(external_ids: &[&str]) -> ObjectDescribe {
    let fields = vec![
        id_field(),
        FieldDescribe::new("Name", FieldType::String).required(),
        FieldDescribe::new("StageName", FieldType::Picklist)
            .required()
            .with_picklist(["Prospecting", "Negotiation", "Closed Won"]),
        FieldDescribe::new("CloseDate", FieldType::Date).required(),
        FieldDescribe::new("Amount", FieldType::Currency),
        FieldDescribe::new("Description", FieldType::Textarea),
        FieldDescribe::new("NextStep", FieldType::String),
        FieldDescribe::new("LeadSource", FieldType::Picklist).with_picklist(["Web", "Org Migration"]),
        FieldDescribe::new("IsClosed", FieldType::Boolean),
        reference("AccountId", "Account"),
    ];
    ObjectDescribe::new("Opportunity", with_external_id(fields, external_ids))
}
