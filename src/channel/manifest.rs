//! Skill manifest: identity, endpoint and declared actions.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// App id the host's token must be scoped to.
    #[serde(default)]
    pub msa_app_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub actions: Vec<ManifestAction>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ManifestAction {
    pub id: String,
    #[serde(default)]
    pub definition: ActionDefinition,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ActionDefinition {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub slots: Vec<SlotSchema>,
    #[serde(default)]
    pub triggers: Triggers,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SlotSchema {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Triggers {
    #[serde(default)]
    pub utterance_sources: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl SkillManifest {
    /// Fetches the manifest over HTTP(S), or reads it from disk for any
    /// other location.
    pub async fn load(location: &str) -> anyhow::Result<Self> {
        let content = if location.starts_with("http://") || location.starts_with("https://") {
            let response = reqwest::get(location).await?;
            if !response.status().is_success() {
                anyhow::bail!("Manifest fetch from {location} returned {}", response.status());
            }
            response.text().await?
        } else {
            tokio::fs::read_to_string(Path::new(location))
                .await
                .map_err(|e| anyhow::anyhow!("Cannot read manifest {location}: {e}"))?
        };

        let manifest = Self::parse(&content)?;
        info!(
            "Manifest {} ({}): {} action(s) at {}",
            manifest.name,
            manifest.id,
            manifest.actions.len(),
            manifest.endpoint
        );
        Ok(manifest)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let manifest: SkillManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("Manifest has an empty id");
        }
        if self.endpoint.trim().is_empty() {
            anyhow::bail!("Manifest {} has an empty endpoint", self.id);
        }
        let mut seen = std::collections::HashSet::new();
        for action in &self.actions {
            if !seen.insert(action.id.as_str()) {
                anyhow::bail!("Manifest {} declares action '{}' twice", self.id, action.id);
            }
        }
        Ok(())
    }

    pub fn action(&self, id: &str) -> Option<&ManifestAction> {
        self.actions.iter().find(|a| a.id.eq_ignore_ascii_case(id))
    }
}

impl ManifestAction {
    pub fn slot(&self, name: &str) -> Option<&SlotSchema> {
        self.definition.slots.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MANIFEST: &str = r#"{
        "id": "calendarSkill",
        "name": "Calendar Skill",
        "description": "Calendar and phone actions",
        "msaAppId": "00000000-1111-2222-3333-444444444444",
        "endpoint": "http://localhost:3980/api/messages",
        "actions": [
            {
                "id": "CreateEvent",
                "definition": {
                    "description": "Create a calendar event",
                    "slots": [
                        { "name": "title", "types": ["string"] },
                        { "name": "startDate", "types": ["string"] }
                    ],
                    "triggers": { "utteranceSources": ["Calendar#CreateCalendarEntry"] }
                }
            },
            { "id": "OutgoingCall" }
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = SkillManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.id, "calendarSkill");
        assert_eq!(manifest.msa_app_id, "00000000-1111-2222-3333-444444444444");
        assert_eq!(manifest.actions.len(), 2);

        let create = manifest.action("createevent").unwrap();
        assert_eq!(create.slot("title").unwrap().types, vec!["string"]);
        assert_eq!(
            create.definition.triggers.utterance_sources,
            vec!["Calendar#CreateCalendarEntry"]
        );
        assert!(manifest.action("OutgoingCall").unwrap().definition.slots.is_empty());
        assert!(manifest.action("Missing").is_none());
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let err = SkillManifest::parse(r#"{"id": "s", "name": "S", "endpoint": " "}"#).unwrap_err();
        assert!(err.to_string().contains("empty endpoint"));
    }

    #[test]
    fn test_duplicate_actions_rejected() {
        let err = SkillManifest::parse(
            r#"{"id": "s", "name": "S", "endpoint": "ws://x", "actions": [{"id": "A"}, {"id": "A"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        let manifest = SkillManifest::load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(manifest.name, "Calendar Skill");
    }

    #[tokio::test]
    async fn test_shipped_manifest_declares_every_action() {
        let manifest = SkillManifest::load("config/manifest.json").await.unwrap();
        for action in ["CreateEvent", "UpdateEvent", "Search", "OutgoingCall"] {
            assert!(manifest.action(action).is_some(), "{action}");
        }
        assert!(manifest.action("OutgoingCall").unwrap().slot("phoneNumber").is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(SkillManifest::load(path.to_str().unwrap()).await.is_err());
    }
}
