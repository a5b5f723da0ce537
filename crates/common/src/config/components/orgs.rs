use crate::types::OrgType;
use serde::Deserialize;
use std::collections::HashMap;

fn default_login_url() -> String {
    "https://login.salesforce.com".to_string()
}

///  ---------------- Org Connections ----------------
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OrgConnection {
    pub instance_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub org_type: OrgType,
}

pub type OrgConnections = HashMap<String, OrgConnection>;
