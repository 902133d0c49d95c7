use crate::{
    config::Config,
    error::RegistryError,
    models::{AccessTokenRecord, Identity, Package, PackageRecord, PersistedState},
};
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// File-backed local package database.
///
/// State lives in `state.json` under the data directory and is re-read per
/// operation, so external writers (a publishing registry sharing the data
/// dir, an operator seeding packages) are picked up without a restart.
/// Mutations are serialized and persisted atomically via tmp + rename.
pub struct Store {
    state_file: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: &Config) -> Result<Self, RegistryError> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let store = Self {
            state_file: config.data_dir.join("state.json"),
            write_lock: Mutex::new(()),
        };
        // surface a corrupt database at startup rather than on first request
        store.read_state().await?;
        debug!("store initialized");
        Ok(store)
    }

    async fn read_state(&self) -> Result<PersistedState, RegistryError> {
        if !tokio::fs::try_exists(&self.state_file).await.unwrap_or(false) {
            return Ok(PersistedState::default());
        }
        let bytes = tokio::fs::read(&self.state_file).await?;
        if bytes.is_empty() {
            return Ok(PersistedState::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn persist_snapshot(&self, snapshot: &PersistedState) -> Result<(), RegistryError> {
        let tmp_file = self.state_file.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp_file, bytes).await?;
        tokio::fs::rename(&tmp_file, &self.state_file).await?;
        Ok(())
    }

    #[instrument(skip(self, manifest), fields(package = package_name))]
    pub async fn upsert_package(
        &self,
        package_name: &str,
        manifest: Value,
    ) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.read_state().await?;
        state.packages.insert(
            package_name.to_string(),
            PackageRecord {
                manifest,
                updated_at: Utc::now().timestamp_millis(),
            },
        );
        self.persist_snapshot(&state).await
    }

    #[instrument(skip(self, token))]
    pub async fn register_token(
        &self,
        token: &str,
        user: &str,
        groups: Vec<String>,
    ) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.read_state().await?;
        state.tokens.insert(
            token.to_string(),
            AccessTokenRecord {
                user: user.to_string(),
                groups,
                created_at: Utc::now().timestamp_millis(),
            },
        );
        self.persist_snapshot(&state).await
    }

    pub async fn identity_for_token(&self, token: &str) -> Result<Option<Identity>, RegistryError> {
        let state = self.read_state().await?;
        Ok(state.tokens.get(token).map(|record| {
            Identity::named(record.user.clone(), record.groups.clone())
        }))
    }

    /// Enumerates all locally known packages as latest-version summaries.
    /// An unreadable or corrupt database is fatal for the calling request.
    #[instrument(skip(self))]
    pub async fn get_local_database(&self) -> Result<Vec<Package>, RegistryError> {
        let state = self.read_state().await?;
        let mut packages = Vec::with_capacity(state.packages.len());
        for (key, record) in state.packages {
            match latest_version_summary(&record.manifest) {
                Some(package) => packages.push(package),
                None => warn!(
                    package = key.as_str(),
                    "manifest has no usable summary; skipping"
                ),
            }
        }
        debug!(count = packages.len(), "local database enumerated");
        Ok(packages)
    }
}

fn latest_version_summary(manifest: &Value) -> Option<Package> {
    let name = manifest.get("name").and_then(Value::as_str)?;
    let mut summary = manifest
        .get("dist-tags")
        .and_then(|tags| tags.get("latest"))
        .and_then(Value::as_str)
        .and_then(|latest| manifest.get("versions")?.get(latest))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    summary.insert("name".to_string(), Value::String(name.to_string()));
    serde_json::from_value(Value::Object(summary)).ok()
}

#[cfg(test)]
mod tests {
    use super::Store;
    use crate::config::Config;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut cfg = Config::defaults();
        cfg.data_dir = dir.path().to_path_buf();
        cfg
    }

    fn manifest(pkg: &str, email: &str) -> serde_json::Value {
        json!({
            "name": pkg,
            "dist-tags": { "latest": "1.0.0" },
            "versions": {
                "1.0.0": {
                    "name": pkg,
                    "version": "1.0.0",
                    "author": { "name": "Ada", "email": email },
                    "dist": { "tarball": format!("https://registry.example/{pkg}/-/{pkg}-1.0.0.tgz") }
                }
            }
        })
    }

    #[tokio::test]
    async fn enumerates_latest_version_summaries() {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open(&test_config(&dir)).await.expect("store");
        store
            .upsert_package("foo", manifest("foo", "foo@bar.com"))
            .await
            .expect("seed foo");
        store
            .upsert_package("bar", manifest("bar", "bar@bar.com"))
            .await
            .expect("seed bar");

        let mut packages = store.get_local_database().await.expect("enumerate");
        packages.sort_by(|left, right| left.name.cmp(&right.name));
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "bar");
        assert_eq!(
            packages[1]
                .dist
                .as_ref()
                .and_then(|dist| dist.tarball.as_deref()),
            Some("https://registry.example/foo/-/foo-1.0.0.tgz")
        );
        assert_eq!(
            packages[1].extra.get("version").and_then(|v| v.as_str()),
            Some("1.0.0")
        );
    }

    #[tokio::test]
    async fn manifest_without_name_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open(&test_config(&dir)).await.expect("store");
        store
            .upsert_package("broken", json!({ "dist-tags": {} }))
            .await
            .expect("seed");

        let packages = store.get_local_database().await.expect("enumerate");
        assert!(packages.is_empty());
    }

    #[tokio::test]
    async fn empty_database_enumerates_to_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open(&test_config(&dir)).await.expect("store");
        assert!(store.get_local_database().await.expect("enumerate").is_empty());
    }

    #[tokio::test]
    async fn corrupt_database_is_an_enumeration_error() {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open(&test_config(&dir)).await.expect("store");
        tokio::fs::write(dir.path().join("state.json"), b"{ not json")
            .await
            .expect("clobber");
        assert!(store.get_local_database().await.is_err());
    }

    #[tokio::test]
    async fn resolves_identity_for_registered_token() {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open(&test_config(&dir)).await.expect("store");
        store
            .register_token("t0ken", "alice", vec!["ops".to_string()])
            .await
            .expect("register");

        let identity = store
            .identity_for_token("t0ken")
            .await
            .expect("lookup")
            .expect("identity");
        assert_eq!(identity.name.as_deref(), Some("alice"));
        assert_eq!(identity.groups, vec!["ops".to_string()]);
        assert!(
            store
                .identity_for_token("other")
                .await
                .expect("lookup")
                .is_none()
        );
    }
}
