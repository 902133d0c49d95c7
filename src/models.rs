use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The requesting principal. `name` is `None` for anonymous requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: Option<String>,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            name: Some(name.into()),
            groups,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Latest-version summary of a locally known package, as enumerated by the
/// store. `author` is kept raw (string or object in the wild); fields this
/// surface does not touch ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Dist>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Normalized author form produced for every listed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorView {
    pub name: String,
    pub email: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Output-facing copy of a [`Package`]: author normalized, tarball rewritten
/// to the local registry address. Built fresh per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageView {
    pub name: String,
    pub author: AuthorView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Dist>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Protocol and host of the inbound request, captured once per request and
/// used only to build the local tarball base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRequestContext {
    pub protocol: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub manifest: Value,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub user: String,
    pub groups: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    pub tokens: HashMap<String, AccessTokenRecord>,
    pub packages: HashMap<String, PackageRecord>,
}
