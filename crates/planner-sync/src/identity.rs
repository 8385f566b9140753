//! Session / identity gate.
//!
//! Decides who the user is from persisted storage and whether sync may run
//! at all. Never touches the network.

use crate::storage::{self, Storage, StorageError, keys};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Name is required")]
    MissingName,

    #[error("Email is required")]
    MissingEmail,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Who is using the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    /// Key for the user's rows in the remote store.
    pub fn user_id(&self) -> String {
        self.email.trim().to_lowercase()
    }

    fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.email.trim().is_empty()
    }
}

/// Resolves identity from a durable tier and a session tier.
pub struct IdentityGate<D, S> {
    durable: D,
    session: S,
}

impl<D: Storage, S: Storage> IdentityGate<D, S> {
    pub fn new(durable: D, session: S) -> Self {
        Self { durable, session }
    }

    pub fn durable(&self) -> &D {
        &self.durable
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// The persisted identity, if any. Durable wins over session. Anything
    /// unreadable counts as absent.
    pub fn resolve(&self) -> Option<Identity> {
        Self::read_tier(&self.durable, keys::USER)
            .or_else(|| Self::read_tier(&self.session, keys::SESSION_USER))
    }

    fn read_tier(tier: &dyn Storage, key: &str) -> Option<Identity> {
        match storage::read_json::<Identity>(tier, key) {
            Ok(Some(identity)) if identity.is_complete() => Some(identity),
            Ok(Some(_)) => {
                debug!("Ignoring incomplete identity under {}", key);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read identity from {}: {}", key, e);
                None
            }
        }
    }

    /// Persist an identity in exactly one tier and clear the other.
    pub fn login(&self, name: &str, email: &str, remember: bool) -> Result<Identity> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(IdentityError::MissingName);
        }
        if email.is_empty() {
            return Err(IdentityError::MissingEmail);
        }

        let identity = Identity {
            name: name.to_string(),
            email: email.to_string(),
        };

        if remember {
            storage::write_json(&self.durable, keys::USER, &identity)?;
            self.session.remove(keys::SESSION_USER)?;
        } else {
            storage::write_json(&self.session, keys::SESSION_USER, &identity)?;
            self.durable.remove(keys::USER)?;
        }

        info!("Logged in as {} (remember: {})", identity.user_id(), remember);
        Ok(identity)
    }

    /// Forget the identity in both tiers.
    pub fn logout(&self) -> Result<()> {
        self.durable.remove(keys::USER)?;
        self.session.remove(keys::SESSION_USER)?;
        info!("Logged out");
        Ok(())
    }
}
