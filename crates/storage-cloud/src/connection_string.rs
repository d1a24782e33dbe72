//! Connection string parsing.
//!
//! Connection strings are `Key=Value` pairs separated by `;`. Keys are
//! matched case-insensitively; values may themselves contain `=` (account
//! keys are base64). Secret values are held in [`Zeroizing`] buffers and
//! never appear in `Debug` output.
//!
//! ```
//! use fleetsim_storage_cloud::{ConnectionString, DocumentAccount};
//!
//! let conn = ConnectionString::parse(
//!     "AccountEndpoint=https://fleet.documents.example:443/;AccountKey=c2VjcmV0PT0=;",
//! )?;
//! let account = DocumentAccount::from_connection_string(&conn)?;
//! assert_eq!(account.endpoint(), "https://fleet.documents.example:443/");
//! assert_eq!(account.key(), "c2VjcmV0PT0=");
//! # Ok::<(), fleetsim_storage_cloud::CloudStorageError>(())
//! ```

use std::{collections::BTreeMap, fmt};

use zeroize::Zeroizing;

use crate::error::{CloudStorageError, Result};

/// Settings whose values are secrets.
const SECRET_KEYS: &[&str] = &["accountkey", "sharedaccesssignature"];

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";
const DEFAULT_PROTOCOL: &str = "https";

/// A parsed connection string.
#[derive(Clone, Default)]
pub struct ConnectionString {
    /// Lowercased key to value.
    settings: BTreeMap<String, Zeroizing<String>>,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.settings {
            if SECRET_KEYS.contains(&key.as_str()) {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, &value.as_str());
            }
        }
        map.finish()
    }
}

impl ConnectionString {
    /// Parses `Key=Value;` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStorageError::ConnectionString`] if the string is empty,
    /// a segment has no `=`, a key is empty, or a key appears twice.
    pub fn parse(input: &str) -> Result<Self> {
        let mut settings = BTreeMap::new();

        for segment in input.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((key, value)) = segment.split_once('=') else {
                return Err(CloudStorageError::ConnectionString {
                    reason: format!("segment '{}' is not Key=Value", redact_segment(segment)),
                });
            };

            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(CloudStorageError::ConnectionString { reason: "empty key".into() });
            }
            if settings.insert(key.clone(), Zeroizing::new(value.trim().to_owned())).is_some() {
                return Err(CloudStorageError::ConnectionString {
                    reason: format!("duplicate setting '{key}'"),
                });
            }
        }

        if settings.is_empty() {
            return Err(CloudStorageError::ConnectionString { reason: "no settings".into() });
        }
        Ok(Self { settings })
    }

    /// Returns the value for `key`, ignoring case.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(&key.to_ascii_lowercase()).map(|v| v.as_str()).filter(|v| !v.is_empty())
    }

    /// Returns the value for `key` or a [`CloudStorageError::MissingSetting`].
    ///
    /// # Errors
    ///
    /// Returns an error if the key is absent or its value is empty.
    pub fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(CloudStorageError::MissingSetting { key })
    }
}

/// Never echo what might be a secret.
fn redact_segment(segment: &str) -> String {
    segment.chars().take(4).chain("...".chars()).collect()
}

/// Account settings for a document database.
#[derive(Clone)]
pub struct DocumentAccount {
    endpoint: String,
    key: Zeroizing<String>,
}

impl fmt::Debug for DocumentAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentAccount")
            .field("endpoint", &self.endpoint)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl DocumentAccount {
    /// Reads `AccountEndpoint` and `AccountKey`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStorageError::MissingSetting`] if either is absent.
    pub fn from_connection_string(conn: &ConnectionString) -> Result<Self> {
        Ok(Self {
            endpoint: conn.require("AccountEndpoint")?.to_owned(),
            key: Zeroizing::new(conn.require("AccountKey")?.to_owned()),
        })
    }

    /// The account endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The account key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Account settings for a table service.
#[derive(Clone)]
pub struct TableAccount {
    endpoint: String,
    account_name: Option<String>,
    key: Option<Zeroizing<String>>,
}

impl fmt::Debug for TableAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableAccount")
            .field("endpoint", &self.endpoint)
            .field("account_name", &self.account_name)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TableAccount {
    /// Reads either an explicit `TableEndpoint`, or `AccountName` plus
    /// `AccountKey` (with optional `DefaultEndpointsProtocol` and
    /// `EndpointSuffix`).
    ///
    /// # Errors
    ///
    /// Returns [`CloudStorageError::MissingSetting`] if neither form is complete.
    pub fn from_connection_string(conn: &ConnectionString) -> Result<Self> {
        let account_name = conn.get("AccountName").map(str::to_owned);
        let key = conn.get("AccountKey").map(|k| Zeroizing::new(k.to_owned()));

        if let Some(endpoint) = conn.get("TableEndpoint") {
            return Ok(Self { endpoint: endpoint.to_owned(), account_name, key });
        }

        let name = conn.require("AccountName")?;
        if key.is_none() {
            return Err(CloudStorageError::MissingSetting { key: "AccountKey" });
        }
        let protocol = conn.get("DefaultEndpointsProtocol").unwrap_or(DEFAULT_PROTOCOL);
        let suffix = conn.get("EndpointSuffix").unwrap_or(DEFAULT_ENDPOINT_SUFFIX);

        Ok(Self {
            endpoint: format!("{protocol}://{name}.table.{suffix}"),
            account_name: Some(name.to_owned()),
            key,
        })
    }

    /// The table service endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The storage account name, if given.
    #[must_use]
    pub fn account_name(&self) -> Option<&str> {
        self.account_name.as_deref()
    }

    /// The account key, if given.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn keys_are_case_insensitive_and_values_keep_equals() {
        let conn = ConnectionString::parse("accountendpoint=https://x/;ACCOUNTKEY=YWJj==").unwrap();
        assert_eq!(conn.get("AccountEndpoint"), Some("https://x/"));
        assert_eq!(conn.get("AccountKey"), Some("YWJj=="));
    }

    #[rstest]
    #[case::empty("")]
    #[case::only_separators(";;;")]
    #[case::no_equals("AccountEndpoint")]
    #[case::empty_key("=value")]
    #[case::duplicate("AccountName=a;accountname=b")]
    fn malformed(#[case] input: &str) {
        assert!(matches!(
            ConnectionString::parse(input),
            Err(CloudStorageError::ConnectionString { .. })
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let conn = ConnectionString::parse("AccountName=fleet;AccountKey=c2VjcmV0").unwrap();
        let debug = format!("{conn:?}");
        assert!(debug.contains("fleet"));
        assert!(!debug.contains("c2VjcmV0"), "{debug}");

        let account = TableAccount::from_connection_string(&conn).unwrap();
        assert!(!format!("{account:?}").contains("c2VjcmV0"));
    }

    #[test]
    fn malformed_segment_error_does_not_leak_value() {
        let err = ConnectionString::parse("AccountKeyc2VjcmV0").unwrap_err();
        assert!(!err.to_string().contains("c2VjcmV0"), "{err}");
    }

    #[test]
    fn document_account_requires_endpoint_and_key() {
        let conn = ConnectionString::parse("AccountEndpoint=https://x/").unwrap();
        assert!(matches!(
            DocumentAccount::from_connection_string(&conn),
            Err(CloudStorageError::MissingSetting { key: "AccountKey" })
        ));

        let conn = ConnectionString::parse("AccountKey=abc").unwrap();
        assert!(matches!(
            DocumentAccount::from_connection_string(&conn),
            Err(CloudStorageError::MissingSetting { key: "AccountEndpoint" })
        ));
    }

    #[test]
    fn table_account_from_name_and_key() {
        let conn = ConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=fleet;AccountKey=a2V5;EndpointSuffix=core.example.net",
        )
        .unwrap();
        let account = TableAccount::from_connection_string(&conn).unwrap();
        assert_eq!(account.endpoint(), "https://fleet.table.core.example.net");
        assert_eq!(account.account_name(), Some("fleet"));
        assert_eq!(account.key(), Some("a2V5"));
    }

    #[test]
    fn table_account_from_explicit_endpoint() {
        let conn = ConnectionString::parse("TableEndpoint=http://127.0.0.1:10002/devstore").unwrap();
        let account = TableAccount::from_connection_string(&conn).unwrap();
        assert_eq!(account.endpoint(), "http://127.0.0.1:10002/devstore");
        assert_eq!(account.key(), None);
    }

    #[test]
    fn table_account_requires_key_without_endpoint() {
        let conn = ConnectionString::parse("AccountName=fleet").unwrap();
        assert!(matches!(
            TableAccount::from_connection_string(&conn),
            Err(CloudStorageError::MissingSetting { key: "AccountKey" })
        ));
    }
}
