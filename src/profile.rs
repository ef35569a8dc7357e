use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Flat key/value applicant profile, read-only for the mapping layer.
///
/// Keys are free-form but the deterministic mapper knows the common ones:
/// first_name, last_name, email, phone, linkedin, github, website, city,
/// work_authorization, requires_sponsorship, years_experience, ...
#[derive(Debug, Clone, Default)]
pub struct Profile {
    values: BTreeMap<String, String>,
}

impl Profile {
    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Load from a JSON object of string values.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open profile {}", path.display()))?;
        let reader = BufReader::new(file);
        let values: BTreeMap<String, String> = serde_json::from_reader(reader)
            .with_context(|| format!("profile {} is not a flat JSON object", path.display()))?;
        Ok(Self { values })
    }

    /// Default location: $XDG_CONFIG_HOME/autoapply/profile.json.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autoapply")
            .join("profile.json")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// First present key out of a list of aliases.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Profile {
        let mut m = BTreeMap::new();
        m.insert("first_name".to_string(), "Jane".to_string());
        m.insert("email".to_string(), "jane@example.com".to_string());
        Profile::from_map(m)
    }

    #[test]
    fn get_any_prefers_first_present_alias() {
        let p = sample();
        assert_eq!(p.get_any(&["given_name", "first_name"]), Some("Jane"));
        assert_eq!(p.get_any(&["nickname"]), None);
    }
}
