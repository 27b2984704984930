//! Ingest credentials
//!
//! The realm lives in the preference store and the access token in the secret
//! store. Both are read at send time, so changes take effect on the next run.

use crate::error::RelayError;
use crate::store::{PreferenceStore, SecretStore};
use std::fmt;
use std::sync::Arc;

/// Realm used when none has been configured
pub const DEFAULT_REALM: &str = "us0";

/// Realm and access token for the ingest API
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub realm: String,
    pub token: String,
}

impl Credentials {
    pub fn new(realm: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            token: token.into(),
        }
    }

    /// Datapoint ingest URL for the realm
    pub fn ingest_url(&self) -> String {
        format!("https://ingest.{}.signalfx.com/v2/datapoint", self.realm)
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("realm", &self.realm)
            .field("token", &if self.has_token() { "<redacted>" } else { "<unset>" })
            .finish()
    }
}

/// Reads and writes credentials through injected stores
#[derive(Clone)]
pub struct CredentialsStore {
    prefs: Arc<dyn PreferenceStore>,
    secrets: Arc<dyn SecretStore>,
    namespace: String,
}

impl CredentialsStore {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        secrets: Arc<dyn SecretStore>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            prefs,
            secrets,
            namespace: namespace.into(),
        }
    }

    pub fn realm_key(&self) -> String {
        format!("{}.sfx_realm", self.namespace)
    }

    pub fn token_key(&self) -> String {
        format!("{}.sfx_token", self.namespace)
    }

    pub fn realm(&self) -> Result<String, RelayError> {
        Ok(self
            .prefs
            .get_string(&self.realm_key())?
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REALM.to_string()))
    }

    pub fn set_realm(&self, realm: &str) -> Result<(), RelayError> {
        self.prefs.set_string(&self.realm_key(), realm.trim())?;
        Ok(())
    }

    pub fn token(&self) -> Result<String, RelayError> {
        Ok(self.secrets.get_secret(&self.token_key())?.unwrap_or_default())
    }

    pub fn set_token(&self, token: &str) -> Result<(), RelayError> {
        self.secrets.set_secret(&self.token_key(), token)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Credentials, RelayError> {
        Ok(Credentials::new(self.realm()?, self.token()?))
    }

    pub fn save(&self, credentials: &Credentials) -> Result<(), RelayError> {
        self.set_realm(&credentials.realm)?;
        self.set_token(&credentials.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn store() -> CredentialsStore {
        let backing = Arc::new(MemoryStore::new());
        CredentialsStore::new(backing.clone(), backing, "HKSFX")
    }

    #[test]
    fn test_defaults_when_unset() {
        let creds = store().load().unwrap();
        assert_eq!(creds.realm, "us0");
        assert_eq!(creds.token, "");
        assert!(!creds.has_token());
    }

    #[test]
    fn test_save_and_load() {
        let store = store();
        store.save(&Credentials::new("eu0", "abc123")).unwrap();

        let creds = store.load().unwrap();
        assert_eq!(creds, Credentials::new("eu0", "abc123"));
        assert_eq!(creds.ingest_url(), "https://ingest.eu0.signalfx.com/v2/datapoint");
    }

    #[test]
    fn test_blank_realm_falls_back_to_default() {
        let store = store();
        store.set_realm("   ").unwrap();
        assert_eq!(store.realm().unwrap(), DEFAULT_REALM);
    }

    #[test]
    fn test_keys_are_namespaced() {
        let store = store();
        assert_eq!(store.realm_key(), "HKSFX.sfx_realm");
        assert_eq!(store.token_key(), "HKSFX.sfx_token");
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", Credentials::new("us1", "very-secret"));
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
