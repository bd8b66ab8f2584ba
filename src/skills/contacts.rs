//! Contacts backend shared by the calendar and phone skills.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub number: String,
    /// "mobile", "work", "home", ...
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phones: Vec<PhoneNumber>,
}

#[async_trait]
pub trait ContactService: Send + Sync {
    /// Contacts whose name matches `query`, best match first.
    async fn find_contacts(&self, query: &str) -> anyhow::Result<Vec<Contact>>;
}

/// Static directory, matched by case-insensitive whole-word prefix.
#[derive(Default)]
pub struct MemoryContacts {
    contacts: Vec<Contact>,
}

impl MemoryContacts {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ContactService for MemoryContacts {
    async fn find_contacts(&self, query: &str) -> anyhow::Result<Vec<Contact>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        // Exact full-name hits win over partial ones.
        let exact: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|c| c.name.to_lowercase() == query)
            .cloned()
            .collect();
        if !exact.is_empty() {
            return Ok(exact);
        }

        Ok(self
            .contacts
            .iter()
            .filter(|c| {
                let name = c.name.to_lowercase();
                name.split_whitespace().any(|w| w.starts_with(&query))
                    || c.email.as_deref().map(|e| e.to_lowercase() == query).unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
pub(crate) fn contact(name: &str, email: &str, phones: &[&str]) -> Contact {
    Contact {
        name: name.to_string(),
        email: (!email.is_empty()).then(|| email.to_string()),
        phones: phones
            .iter()
            .map(|n| PhoneNumber {
                number: n.to_string(),
                kind: "mobile".to_string(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> MemoryContacts {
        MemoryContacts::new(vec![
            contact("Alice Smith", "alice@contoso.com", &["+14255550101"]),
            contact("Alice Jones", "ajones@contoso.com", &[]),
            contact("Bob Brown", "bob@contoso.com", &["4255550199", "+14255550100"]),
        ])
    }

    #[tokio::test]
    async fn test_first_name_matches_several() {
        let found = directory().find_contacts("alice").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_full_name_is_exact() {
        let found = directory().find_contacts("Alice Jones").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email.as_deref(), Some("ajones@contoso.com"));
    }

    #[tokio::test]
    async fn test_email_lookup_and_misses() {
        let found = directory().find_contacts("bob@contoso.com").await.unwrap();
        assert_eq!(found[0].name, "Bob Brown");
        assert!(directory().find_contacts("zed").await.unwrap().is_empty());
        assert!(directory().find_contacts("  ").await.unwrap().is_empty());
    }
}
