//! Credential pools
//!
//! One ordered pool per provider with a rotating `current_index`. Credentials the
//! provider rejected are remembered for the session and skipped by rotation.

use std::collections::BTreeSet;

use kiln_core::text::fingerprint;
use kiln_core::InvocationError;

/// Repair common copy-paste damage in a pasted key.
///
/// Keeps only the part before a comma, restores an `_0` suffix broken into ` 0`
/// and drops inner whitespace. Returns `None` for a blank key.
pub fn clean_key(raw: &str) -> Option<String> {
    let mut key = raw.split(',').next().unwrap_or_default().trim().to_string();

    if let Some(stem) = key.strip_suffix(" 0") {
        key = format!("{}_0", stem);
    }
    if !key.contains("_0") {
        key.retain(|c| !c.is_whitespace());
    }

    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ModelCredential {
    pub key: String,
    pub provider_id: String,
}

impl ModelCredential {
    /// Masked, log-safe name of this credential
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key)
    }
}

impl std::fmt::Debug for ModelCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCredential")
            .field("key", &self.fingerprint())
            .field("provider_id", &self.provider_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CredentialPool {
    provider_id: String,
    credentials: Vec<ModelCredential>,
    current_index: usize,
    invalid: BTreeSet<usize>,
}

impl CredentialPool {
    /// Build a pool from raw keys; blank keys are dropped
    pub fn new(provider_id: impl Into<String>, keys: impl IntoIterator<Item = String>) -> Self {
        let provider_id = provider_id.into();
        let credentials = keys
            .into_iter()
            .filter_map(|raw| clean_key(&raw))
            .map(|key| ModelCredential {
                key,
                provider_id: provider_id.clone(),
            })
            .collect();

        Self {
            provider_id,
            credentials,
            current_index: 0,
            invalid: BTreeSet::new(),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn credentials(&self) -> &[ModelCredential] {
        &self.credentials
    }

    /// The active credential
    pub fn current(&self) -> Result<&ModelCredential, InvocationError> {
        if self.valid_count() == 0 {
            return Err(if self.is_empty() {
                InvocationError::MissingCredentials(self.provider_id.clone())
            } else {
                self.exhausted()
            });
        }
        self.credentials
            .get(self.current_index)
            .ok_or_else(|| InvocationError::MissingCredentials(self.provider_id.clone()))
    }

    /// Advance to the next usable credential, wrapping around.
    ///
    /// Returns the new index. With a single usable credential the index stays put.
    pub fn rotate(&mut self) -> usize {
        let len = self.credentials.len();
        for step in 1..=len {
            let candidate = (self.current_index + step) % len;
            if !self.invalid.contains(&candidate) {
                self.current_index = candidate;
                break;
            }
        }
        self.current_index
    }

    /// Remember that the provider rejected the credential at `index`
    pub fn mark_invalid(&mut self, index: usize) {
        if index < self.credentials.len() {
            self.invalid.insert(index);
        }
    }

    pub fn is_invalid(&self, index: usize) -> bool {
        self.invalid.contains(&index)
    }

    /// Credentials not yet rejected
    pub fn valid_count(&self) -> usize {
        self.credentials.len() - self.invalid.len()
    }

    pub fn exhausted(&self) -> InvocationError {
        InvocationError::AllCredentialsExhausted {
            provider: self.provider_id.clone(),
            pool_size: self.credentials.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_hygiene() {
        assert_eq!(clean_key("AIzaKEY1,AIzaKEY2").as_deref(), Some("AIzaKEY1"));
        assert_eq!(clean_key("abc 0").as_deref(), Some("abc_0"));
        assert_eq!(clean_key(" sk- 12 34 ").as_deref(), Some("sk-1234"));
        assert_eq!(clean_key("   "), None);
        assert_eq!(clean_key(",AIzaKEY"), None);
    }

    #[test]
    fn test_rotation_skips_invalid() {
        let mut pool = CredentialPool::new("gemini", vec!["a1".into(), "b2".into(), "c3".into()]);
        assert_eq!(pool.current().unwrap().key, "a1");
        pool.mark_invalid(1);
        assert_eq!(pool.rotate(), 2);
        assert_eq!(pool.rotate(), 0);
        assert_eq!(pool.valid_count(), 2);

        pool.mark_invalid(0);
        pool.mark_invalid(2);
        assert_eq!(
            pool.current().unwrap_err(),
            InvocationError::AllCredentialsExhausted {
                provider: "gemini".into(),
                pool_size: 3
            }
        );
    }

    #[test]
    fn test_empty_pool_reports_missing_credentials() {
        let pool = CredentialPool::new("openai", vec![" ".to_string()]);
        assert!(pool.is_empty());
        assert_eq!(
            pool.current().unwrap_err(),
            InvocationError::MissingCredentials("openai".into())
        );
    }

    #[test]
    fn test_debug_masks_keys() {
        let pool = CredentialPool::new("gemini", vec!["AIzaSyABCDEFGHIJKLMNOP".to_string()]);
        let debug = format!("{:?}", pool.current().unwrap());
        assert!(!debug.contains("ABCDEFGHIJ"));
        assert!(debug.contains("AIzaS...MNOP"));
    }

    proptest! {
        #[test]
        fn prop_rotation_visits_every_valid_credential(len in 1usize..8, invalid in proptest::collection::btree_set(0usize..8, 0..4)) {
            let keys: Vec<String> = (0..len).map(|i| format!("key{}", i)).collect();
            let mut pool = CredentialPool::new("p", keys);
            for idx in &invalid {
                pool.mark_invalid(*idx);
            }
            let valid: BTreeSet<usize> = (0..len).filter(|i| !invalid.contains(i)).collect();
            prop_assume!(!valid.is_empty());

            let mut seen = BTreeSet::new();
            for _ in 0..len {
                seen.insert(pool.rotate());
            }
            prop_assert_eq!(seen, valid);
        }
    }
}
