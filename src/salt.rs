//! Process-wide cache-busting salt.
//!
//! The salt is resolved once during startup and appended to every
//! dynamically generated resource URI as `?salt=<value>`. Without an
//! explicit override it is derived from the startup time, so each
//! unconfigured restart forces clients to refetch; pinning it via
//! [`SALT_ENV`] keeps URIs identical across restarts and replicas.

use std::sync::OnceLock;

/// Environment variable holding an explicit salt.
pub const SALT_ENV: &str = "APPHOST_SALT";

/// Query parameter carrying the salt in advertised URIs.
pub const SALT_PARAM: &str = "salt";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaltError {
    #[error("salt read before initialization")]
    Uninitialized,
    #[error("salt already initialized")]
    AlreadyInitialized,
}

/// Write-once salt holder, shared by reference with every component that
/// builds resource URIs.
#[derive(Debug)]
pub struct SaltStore {
    scheme: String,
    value: OnceLock<String>,
}

impl SaltStore {
    pub fn new(scheme: impl Into<String>) -> Self {
        SaltStore {
            scheme: scheme.into(),
            value: OnceLock::new(),
        }
    }

    /// Resolve the salt from [`SALT_ENV`], falling back to the current
    /// time in epoch milliseconds.
    pub fn initialize(&self) -> Result<&str, SaltError> {
        let env = std::env::var(SALT_ENV).ok();
        self.initialize_with(env.as_deref())
    }

    /// Resolve the salt from an explicit override. An empty override counts
    /// as absent.
    pub fn initialize_with(&self, override_value: Option<&str>) -> Result<&str, SaltError> {
        let (value, source) = match override_value.filter(|v| !v.is_empty()) {
            Some(v) => (v.to_string(), "override"),
            None => (chrono::Utc::now().timestamp_millis().to_string(), "startup-time"),
        };

        self.value
            .set(value)
            .map_err(|_| SaltError::AlreadyInitialized)?;
        let salt = self.current()?;
        tracing::info!(salt, source, "salt initialized");
        Ok(salt)
    }

    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn current(&self) -> Result<&str, SaltError> {
        self.value
            .get()
            .map(String::as_str)
            .ok_or(SaltError::Uninitialized)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// `<scheme>://<id>?salt=<salt>`. An id that already has a query keeps
    /// it and gets the salt appended as one more parameter; a `salt`
    /// parameter already present in the id is replaced.
    pub fn uri_for(&self, id: &str) -> Result<String, SaltError> {
        let salt = self.current()?;
        let id = resource_key(id);
        let sep = if id.contains('?') { '&' } else { '?' };
        Ok(format!("{}://{}{}{}={}", self.scheme, id, sep, SALT_PARAM, salt))
    }
}

/// Registry key for a URI: the URI with its `salt` query parameter
/// removed. Other query parameters keep their order.
pub fn resource_key(uri: &str) -> String {
    let Some((base, query)) = uri.split_once('?') else {
        return uri.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(k, _)| k);
            !pair.is_empty() && name != SALT_PARAM
        })
        .collect();

    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}
