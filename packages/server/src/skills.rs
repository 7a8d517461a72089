//! Installed-skill registry backing `/api/skills`.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use steward_types::SkillRecord;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill '{0}' already installed")]
    AlreadyInstalled(String),
    #[error("skill '{0}' not found")]
    NotFound(String),
    #[error("invalid skill source: {0}")]
    InvalidSource(String),
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, SkillRecord>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<SkillRecord> {
        let mut skills: Vec<_> = self.skills.read().values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    /// Install from a source reference (path or URL). The name defaults to
    /// the last path segment.
    pub fn install(&self, source: &str, name: Option<&str>) -> Result<SkillRecord, SkillError> {
        if source.trim().is_empty() {
            return Err(SkillError::InvalidSource("empty source".into()));
        }
        let name = name
            .map(str::to_string)
            .or_else(|| {
                source
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .map(str::to_string)
            })
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SkillError::InvalidSource(source.to_string()))?;

        let mut skills = self.skills.write();
        if skills.contains_key(&name) {
            return Err(SkillError::AlreadyInstalled(name));
        }
        let record = SkillRecord {
            name: name.clone(),
            source: source.to_string(),
            enabled: true,
            installed_at: Utc::now(),
        };
        skills.insert(name, record.clone());
        Ok(record)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SkillError> {
        let mut skills = self.skills.write();
        let skill = skills
            .get_mut(name)
            .ok_or_else(|| SkillError::NotFound(name.to_string()))?;
        skill.enabled = enabled;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), SkillError> {
        self.skills
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SkillError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_list_toggle_remove() {
        let registry = SkillRegistry::new();
        let record = registry
            .install("https://skills.example/repo/email-drafts", None)
            .unwrap();
        assert_eq!(record.name, "email-drafts");
        assert!(record.enabled);

        assert!(matches!(
            registry.install("elsewhere/email-drafts", None),
            Err(SkillError::AlreadyInstalled(_))
        ));

        registry.set_enabled("email-drafts", false).unwrap();
        assert!(!registry.list()[0].enabled);

        registry.remove("email-drafts").unwrap();
        assert!(registry.list().is_empty());
        assert!(matches!(
            registry.remove("email-drafts"),
            Err(SkillError::NotFound(_))
        ));
    }
}
