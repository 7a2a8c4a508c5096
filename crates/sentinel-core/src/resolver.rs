//! Credential resolution.
//!
//! Resolution order:
//!
//! 1. Explicit key from settings → returned as-is, cache untouched.
//! 2. Cached record that is unexpired and minted against the configured
//!    endpoints → its key.
//! 3. Auto-trial disabled → [`Error::NoCredentialConfigured`].
//! 4. Mint a trial key, persist it, return it.
//!
//! Resolutions are serialized within a process, so concurrent callers that
//! all miss the cache share a single mint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CredentialCache, FileCredentialCache};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::minter::{HttpTrialKeyMinter, TrialKeyMinter};
use crate::record::CredentialRecord;

/// Where a resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Configured explicitly (`SENTINEL_API_KEY`).
    Explicit,
    /// Reused from the cache.
    Cache,
    /// Freshly minted trial key.
    Trial,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Cache => "cache",
            Self::Trial => "trial",
        };
        f.write_str(s)
    }
}

/// State of the cached record relative to the current settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// No readable record.
    Absent,
    /// Reusable.
    Valid,
    /// `expires_at` is not in the future.
    Expired,
    /// Minted against a different scoring or token endpoint.
    EndpointMismatch,
    /// Record holds a blank key.
    EmptyKey,
}

impl CacheState {
    /// Classifies `record` against `settings` at `now`.
    pub fn of(record: Option<&CredentialRecord>, settings: &Settings, now: DateTime<Utc>) -> Self {
        let Some(record) = record else {
            return Self::Absent;
        };
        if record.api_key.trim().is_empty() {
            Self::EmptyKey
        } else if record.is_expired_at(now) {
            Self::Expired
        } else if !record.matches_endpoints(&settings.api_base_url, &settings.token_base_url) {
            Self::EndpointMismatch
        } else {
            Self::Valid
        }
    }
}

/// A credential ready to be attached to an outbound request.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    /// Bearer token.
    pub api_key: SecretString,
    /// Where the token came from.
    pub source: CredentialSource,
    /// Backing record for cached or minted keys; `None` for explicit keys.
    pub record: Option<CredentialRecord>,
}

impl ResolvedCredential {
    /// Upgrade URL recorded with the trial key, if any.
    pub fn upgrade_url(&self) -> Option<&str> {
        self.record.as_ref().and_then(|r| r.upgrade_url.as_deref())
    }
}

/// Credential summary for diagnostics. Never contains the key.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    /// Source the next resolution would use without minting, if any.
    pub source: Option<CredentialSource>,
    pub cache_state: CacheState,
    pub auto_trial: bool,
    pub account_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub api_base_url: String,
    pub token_base_url: String,
}

/// Resolves the credential for every proxied call.
///
/// Holds the only handle to the credential cache; nothing else reads or
/// writes it.
pub struct CredentialResolver {
    settings: Arc<Settings>,
    cache: Arc<dyn CredentialCache>,
    minter: Arc<dyn TrialKeyMinter>,
    /// Serializes load → mint → store.
    resolve_lock: Mutex<()>,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    /// Creates a resolver with explicit collaborators.
    pub fn new(
        settings: Arc<Settings>,
        cache: Arc<dyn CredentialCache>,
        minter: Arc<dyn TrialKeyMinter>,
    ) -> Self {
        Self {
            settings,
            cache,
            minter,
            resolve_lock: Mutex::new(()),
        }
    }

    /// Creates a resolver backed by the credential file and the HTTP
    /// token service named in `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: Arc<Settings>) -> Result<Self> {
        let cache = Arc::new(FileCredentialCache::new(settings.credentials_path.clone()));
        let minter = Arc::new(HttpTrialKeyMinter::new(&settings)?);
        Ok(Self::new(settings, cache, minter))
    }

    /// Returns the settings this resolver was built with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolves a usable credential.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No explicit key is set, no valid record is cached and auto-trial
    ///   is disabled ([`Error::NoCredentialConfigured`])
    /// - Minting a trial key fails ([`Error::TrialMintFailed`])
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> Result<ResolvedCredential> {
        if let Some(api_key) = &self.settings.api_key {
            debug!(source = %CredentialSource::Explicit, "Resolved credential");
            return Ok(ResolvedCredential {
                api_key: api_key.clone(),
                source: CredentialSource::Explicit,
                record: None,
            });
        }

        let _guard = self.resolve_lock.lock().await;

        let cached = self.with_cache(|cache| Ok(cache.load())).await?;
        let state = CacheState::of(cached.as_ref(), &self.settings, Utc::now());
        if let (CacheState::Valid, Some(record)) = (state, cached) {
            debug!(source = %CredentialSource::Cache, "Resolved credential");
            return Ok(Self::from_record(record, CredentialSource::Cache));
        }
        debug!(cache_state = ?state, "Cached credential not reusable");

        if self.settings.no_trial {
            return Err(Error::NoCredentialConfigured);
        }

        let record = self.minter.mint().await?;

        let to_store = record.clone();
        if let Err(e) = self.with_cache(move |cache| cache.store(&to_store)).await {
            // The key still works for this process; it just won't survive a restart.
            warn!(error = %e, "Failed to cache trial credential");
        }

        info!(source = %CredentialSource::Trial, "Resolved credential");
        Ok(Self::from_record(record, CredentialSource::Trial))
    }

    /// Removes the cached credential.
    ///
    /// Returns `true` if a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be cleared.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<bool> {
        let _guard = self.resolve_lock.lock().await;
        let removed = self.with_cache(|cache| cache.clear()).await?;
        info!(removed, "Reset cached credentials");
        Ok(removed)
    }

    /// Reports the current credential situation without minting.
    ///
    /// # Errors
    ///
    /// Returns an error if the blocking cache task fails.
    pub async fn status(&self) -> Result<CredentialStatus> {
        let settings = &self.settings;
        let mut status = CredentialStatus {
            source: None,
            cache_state: CacheState::Absent,
            auto_trial: !settings.no_trial,
            account_id: None,
            expires_at: None,
            api_base_url: settings.api_base_url.clone(),
            token_base_url: settings.token_base_url.clone(),
        };

        if settings.has_explicit_key() {
            status.source = Some(CredentialSource::Explicit);
            return Ok(status);
        }

        let cached = self.with_cache(|cache| Ok(cache.load())).await?;
        status.cache_state = CacheState::of(cached.as_ref(), settings, Utc::now());
        if status.cache_state == CacheState::Valid {
            status.source = Some(CredentialSource::Cache);
        }
        if let Some(record) = cached {
            status.account_id = record.account_id;
            status.expires_at = Some(record.expires_at);
        }
        Ok(status)
    }

    fn from_record(record: CredentialRecord, source: CredentialSource) -> ResolvedCredential {
        ResolvedCredential {
            api_key: SecretString::new(record.api_key.clone().into()),
            source,
            record: Some(record),
        }
    }

    /// Runs a cache operation on the blocking thread pool.
    ///
    /// A dropped caller does not abort the operation, so a store that has
    /// started always completes its rename.
    async fn with_cache<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn CredentialCache) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || f(cache.as_ref()))
            .await
            .map_err(|e| Error::Storage(format!("Task join error: {e}")))?
    }
}
