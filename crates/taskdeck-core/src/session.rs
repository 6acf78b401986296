use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

/// Key/value file standing in for browser local storage.
#[derive(Debug)]
pub struct SessionStore {
    pub path: PathBuf,
}

impl SessionStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let path = data_dir.join("session.json");
        debug!(file = %path.display(), "opened session store");
        Ok(Self { path })
    }

    pub fn get_item(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    pub fn set_items(&self, items: &[(&str, String)]) -> anyhow::Result<()> {
        let mut map = self.load().map_err(|err| anyhow!(err))?;
        for (key, value) in items {
            map.insert((*key).to_string(), value.clone());
        }
        self.save(&map)
    }

    pub fn remove_items(&self, keys: &[&str]) -> anyhow::Result<()> {
        let mut map = self.load().map_err(|err| anyhow!(err))?;
        for key in keys {
            map.remove(*key);
        }
        self.save(&map)
    }

    fn load(&self) -> ClientResult<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(ClientError::malformed(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|err| {
            ClientError::malformed(format!("failed parsing {}: {err}", self.path.display()))
        })
    }

    fn save(&self, map: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, map)?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

/// The authenticated session, passed explicitly to whatever needs the owner id.
#[derive(Debug)]
pub struct Session {
    store: SessionStore,
}

impl Session {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(SessionStore::open(data_dir)?))
    }

    /// Stores the token and its decoded payload. Nothing is stored if the token does not decode.
    #[tracing::instrument(skip_all)]
    pub fn store_login(&self, token: &str) -> anyhow::Result<String> {
        let claims = decode_token_payload(token)?;
        let owner_id = owner_id_from_record(&claims)?;
        let user_record = serde_json::to_string(&claims)?;
        self.store.set_items(&[
            (TOKEN_KEY, token.to_string()),
            (USER_KEY, user_record),
        ])?;
        info!(owner_id = %owner_id, "session stored");
        Ok(owner_id)
    }

    #[tracing::instrument(skip(self))]
    pub fn logout(&self) -> anyhow::Result<()> {
        self.store.remove_items(&[TOKEN_KEY, USER_KEY])?;
        info!("session cleared");
        Ok(())
    }

    pub fn bearer(&self) -> Option<String> {
        match self.store.get_item(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.trim().is_empty()),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable session store");
                None
            }
        }
    }

    /// Resolves the owner id from local state only.
    ///
    /// The stored user record wins; without one the token payload is decoded.
    #[tracing::instrument(skip(self))]
    pub fn resolve_owner_id(&self) -> ClientResult<String> {
        let user = self.store.get_item(USER_KEY)?;
        let token = self.store.get_item(TOKEN_KEY)?;

        let record = match (user, token) {
            (Some(user), _) => serde_json::from_str::<Value>(&user)
                .map_err(|err| ClientError::malformed(format!("user record is not JSON: {err}")))?,
            (None, Some(token)) => decode_token_payload(&token)?,
            (None, None) => return Err(ClientError::NoSessionFound),
        };

        let owner_id = owner_id_from_record(&record)?;
        debug!(owner_id = %owner_id, "resolved session owner");
        Ok(owner_id)
    }
}

/// Decodes the payload segment of a JWT. The signature is not checked.
pub fn decode_token_payload(token: &str) -> ClientResult<Value> {
    let mut segments = token.trim().split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_), Some(payload)) if !payload.is_empty() => payload,
        _ => return Err(ClientError::malformed("token is not a JWT")),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| ClientError::malformed(format!("token payload is not base64url: {err}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|err| ClientError::malformed(format!("token payload is not JSON: {err}")))
}

fn owner_id_from_record(record: &Value) -> ClientResult<String> {
    match record.pointer("/user/id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ClientError::malformed("session has no user.id")),
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{Session, SessionStore, TOKEN_KEY, USER_KEY, decode_token_payload};
    use crate::error::ClientError;

    fn jwt_for(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn empty_store_has_no_session() {
        let temp = tempdir().unwrap();
        let session = Session::open(temp.path()).unwrap();
        assert!(matches!(
            session.resolve_owner_id(),
            Err(ClientError::NoSessionFound)
        ));
        assert_eq!(session.bearer(), None);
    }

    #[test]
    fn login_stores_both_keys_and_logout_clears_them() {
        let temp = tempdir().unwrap();
        let session = Session::open(temp.path()).unwrap();
        let token = jwt_for(json!({"user": {"id": "u-42"}, "iat": 1}));

        let owner = session.store_login(&token).unwrap();
        assert_eq!(owner, "u-42");
        assert_eq!(session.resolve_owner_id().unwrap(), "u-42");
        assert_eq!(session.bearer().as_deref(), Some(token.as_str()));

        session.logout().unwrap();
        assert!(matches!(
            session.resolve_owner_id(),
            Err(ClientError::NoSessionFound)
        ));
    }

    #[test]
    fn token_alone_is_decoded() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store
            .set_items(&[(TOKEN_KEY, jwt_for(json!({"user": {"id": 7}})))])
            .unwrap();
        let session = Session::new(store);
        assert_eq!(session.resolve_owner_id().unwrap(), "7");
    }

    #[test]
    fn user_record_without_id_is_malformed() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store
            .set_items(&[(USER_KEY, r#"{"user":{"name":"x"}}"#.to_string())])
            .unwrap();
        let session = Session::new(store);
        assert!(matches!(
            session.resolve_owner_id(),
            Err(ClientError::MalformedSessionData(_))
        ));
    }

    #[test]
    fn garbage_user_record_is_malformed() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store
            .set_items(&[(USER_KEY, "{not json".to_string())])
            .unwrap();
        let session = Session::new(store);
        assert!(session.resolve_owner_id().unwrap_err().is_session_error());
    }

    #[test]
    fn bad_token_is_rejected_without_storing() {
        let temp = tempdir().unwrap();
        let session = Session::open(temp.path()).unwrap();
        assert!(session.store_login("not-a-token").is_err());
        assert!(matches!(
            decode_token_payload("a.%%%.c"),
            Err(ClientError::MalformedSessionData(_))
        ));
        assert_eq!(session.bearer(), None);
    }
}
