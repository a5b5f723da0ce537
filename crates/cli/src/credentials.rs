use async_trait::async_trait;
use common::types::OrgId;
use common::utils::paths_with_ext;
use log::debug;
use shared_clients::{CredentialStore, PlatformError, TokenRecord};
use std::fs;
use std::path::{Path, PathBuf};

/// Development credential store: one `<org>.json` file per org under a
/// directory. Files are written in plain text.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, org_id: &OrgId) -> Result<PathBuf, PlatformError> {
        let name = org_id.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(PlatformError::credentials(format!(
                "org id '{name}' cannot be used as a credential file name"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> PlatformError {
    PlatformError::credentials(format!("{}: {err}", path.display()))
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_credentials(&self, org_id: &OrgId) -> Result<Option<TokenRecord>, PlatformError> {
        let path = self.path_for(org_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        let record: TokenRecord = serde_json::from_str(&raw).map_err(|e| {
            PlatformError::credentials(format!("{} is not a token record: {e}", path.display()))
        })?;
        if &record.org_id != org_id {
            return Err(PlatformError::credentials(format!(
                "{} holds credentials for org {}",
                path.display(),
                record.org_id
            )));
        }
        Ok(Some(record))
    }

    async fn save_credentials(&self, record: &TokenRecord) -> Result<(), PlatformError> {
        let path = self.path_for(&record.org_id)?;
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| PlatformError::credentials(format!("failed to encode record: {e}")))?;
        // write then rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        debug!("org={} credentials saved to {}", record.org_id, path.display());
        Ok(())
    }

    async fn known_orgs(&self) -> Result<Vec<OrgId>, PlatformError> {
        Ok(paths_with_ext(&self.dir, "json")
            .into_iter()
            .filter(|p| p.parent() == Some(self.dir.as_path()))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(OrgId::new))
            .collect())
    }
}
