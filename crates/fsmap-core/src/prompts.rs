//! Prompt templates for the generative stage
//!
//! A prompt is a markdown file with YAML frontmatter and two sections,
//! `# System` and `# User`. Placeholders look like `{{domain}}`.
//!
//! Each prompt ships embedded in the binary. A file with the same name in
//! `~/.local/share/fsmap/prompts/overrides/` replaces it; an override that
//! fails to parse is ignored with a warning.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const SYSTEM_HEADER: &str = "# System";
const USER_HEADER: &str = "# User";

/// Known prompt IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Full twelve-column classification of one primary group
    ClassifyPrimaryGroup,
}

impl PromptId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassifyPrimaryGroup => "classify_primary_group",
        }
    }

    pub fn all() -> &'static [PromptId] {
        &[Self::ClassifyPrimaryGroup]
    }

    fn embedded(&self) -> &'static str {
        match self {
            Self::ClassifyPrimaryGroup => {
                include_str!("../../../prompts/classify_primary_group.md")
            }
        }
    }

    fn file_name(&self) -> String {
        format!("{}.md", self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptMetadata {
    pub id: String,
    pub version: u32,
    #[serde(default)]
    pub task_type: Option<String>,
}

/// Where a loaded prompt came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Embedded,
    Override(PathBuf),
}

/// A parsed prompt, split into its system and user templates
#[derive(Debug, Clone)]
pub struct Prompt {
    pub metadata: PromptMetadata,
    pub system: String,
    pub user: String,
    pub source: PromptSource,
}

impl Prompt {
    pub fn parse(content: &str, source: PromptSource) -> Result<Self> {
        let (frontmatter, body) = split_frontmatter(content)?;
        let metadata: PromptMetadata = serde_yaml::from_str(frontmatter)
            .map_err(|e| Error::InvalidData(format!("Invalid prompt frontmatter: {}", e)))?;

        let user_at = body.find(USER_HEADER).ok_or_else(|| {
            Error::InvalidData(format!("Prompt {} has no {} section", metadata.id, USER_HEADER))
        })?;
        let (before_user, user) = body.split_at(user_at);
        let system = before_user
            .trim()
            .strip_prefix(SYSTEM_HEADER)
            .unwrap_or(before_user)
            .trim();
        if system.is_empty() {
            return Err(Error::InvalidData(format!(
                "Prompt {} has an empty {} section",
                metadata.id, SYSTEM_HEADER
            )));
        }

        Ok(Self {
            system: system.to_string(),
            user: user[USER_HEADER.len()..].trim().to_string(),
            metadata,
            source,
        })
    }

    pub fn is_override(&self) -> bool {
        matches!(self.source, PromptSource::Override(_))
    }

    pub fn render_system(&self, vars: &HashMap<&str, &str>) -> String {
        substitute(&self.system, vars)
    }

    pub fn render_user(&self, vars: &HashMap<&str, &str>) -> String {
        substitute(&self.user, vars)
    }
}

/// Resolves prompts against an optional override directory
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
}

impl PromptLibrary {
    /// Library using the default override directory
    pub fn new() -> Self {
        Self {
            override_dir: default_prompts_dir(),
        }
    }

    pub fn with_override_dir(path: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(path.into()),
        }
    }

    /// Library that only knows the embedded prompts
    pub fn embedded_only() -> Self {
        Self { override_dir: None }
    }

    pub fn load(&self, id: PromptId) -> Result<Prompt> {
        if let Some(path) = self.override_path(id).filter(|p| p.exists()) {
            match read_override(&path) {
                Ok(prompt) => {
                    debug!(path = %path.display(), "Using prompt override");
                    return Ok(prompt);
                }
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unusable prompt override"
                ),
            }
        }
        Prompt::parse(id.embedded(), PromptSource::Embedded)
    }

    pub fn has_override(&self, id: PromptId) -> bool {
        self.override_path(id).is_some_and(|p| p.exists())
    }

    pub fn override_dir(&self) -> Option<&Path> {
        self.override_dir.as_deref()
    }

    fn override_path(&self, id: PromptId) -> Option<PathBuf> {
        self.override_dir.as_ref().map(|d| d.join(id.file_name()))
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Default prompts override directory
pub fn default_prompts_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("fsmap").join("prompts").join("overrides"))
}

fn read_override(path: &Path) -> Result<Prompt> {
    let content = fs::read_to_string(path)?;
    Prompt::parse(&content, PromptSource::Override(path.to_path_buf()))
}

/// Split `---\n<yaml>\n---\n<body>` into its two halves
fn split_frontmatter(content: &str) -> Result<(&str, &str)> {
    let rest = content
        .trim_start()
        .strip_prefix("---")
        .ok_or_else(|| Error::InvalidData("Prompt must start with YAML frontmatter (---)".into()))?;
    rest.split_once("\n---")
        .map(|(front, body)| (front.trim(), body.trim()))
        .ok_or_else(|| Error::InvalidData("Prompt frontmatter not closed (missing second ---)".into()))
}

/// Replace `{{key}}` for every key in `vars`; unknown placeholders stay as-is
fn substitute(template: &str, vars: &HashMap<&str, &str>) -> String {
    vars.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{{{}}}}}", key), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = "---\nid: classify_primary_group\nversion: 2\n---\n# System\nCustom {{domain}}\n\n# User\nItem: {{primary_group}}\n";

    #[test]
    fn test_parse_splits_sections() {
        let prompt = Prompt::parse(MINIMAL, PromptSource::Embedded).unwrap();
        assert_eq!(prompt.metadata.version, 2);
        assert!(prompt.metadata.task_type.is_none());
        assert_eq!(prompt.system, "Custom {{domain}}");
        assert_eq!(prompt.user, "Item: {{primary_group}}");
    }

    #[test]
    fn test_parse_rejects_malformed_prompts() {
        assert!(Prompt::parse("# System\nno frontmatter", PromptSource::Embedded).is_err());
        assert!(Prompt::parse("---\nid: x\n# System", PromptSource::Embedded).is_err());
        assert!(Prompt::parse(
            "---\nid: x\nversion: 1\n---\n# System\nOnly system text\n",
            PromptSource::Embedded
        )
        .is_err());
        assert!(Prompt::parse(
            "---\nid: x\nversion: 1\n---\n# System\n\n# User\n{{primary_group}}\n",
            PromptSource::Embedded
        )
        .is_err());
    }

    #[test]
    fn test_embedded_prompt_renders() {
        let prompt = PromptLibrary::embedded_only()
            .load(PromptId::ClassifyPrimaryGroup)
            .unwrap();
        assert_eq!(prompt.metadata.id, "classify_primary_group");
        assert_eq!(prompt.source, PromptSource::Embedded);

        let mut vars = HashMap::new();
        vars.insert("domain", "Manufacturing");
        vars.insert("domain_rules", "RULES-BLOCK");
        vars.insert("primary_group", "Factory Rent");

        let system = prompt.render_system(&vars);
        assert!(system.contains("Domain: Manufacturing"));
        assert!(system.contains("RULES-BLOCK"));
        assert!(!system.contains("{{"));
        assert!(!system.contains("Factory Rent"));

        assert_eq!(
            prompt.render_user(&vars),
            "Classify this accounting line item with ALL 12 columns:\nFactory Rent"
        );
    }

    #[test]
    fn test_override_takes_precedence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("classify_primary_group.md"), MINIMAL).unwrap();

        let lib = PromptLibrary::with_override_dir(dir.path());
        assert!(lib.has_override(PromptId::ClassifyPrimaryGroup));
        let prompt = lib.load(PromptId::ClassifyPrimaryGroup).unwrap();
        assert!(prompt.is_override());

        let mut vars = HashMap::new();
        vars.insert("domain", "Retail / E-commerce");
        vars.insert("primary_group", "Packaging");
        assert_eq!(prompt.render_system(&vars), "Custom Retail / E-commerce");
        assert_eq!(prompt.render_user(&vars), "Item: Packaging");
    }

    #[test]
    fn test_broken_override_falls_back_to_embedded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("classify_primary_group.md"), "no frontmatter").unwrap();

        let lib = PromptLibrary::with_override_dir(dir.path());
        let prompt = lib.load(PromptId::ClassifyPrimaryGroup).unwrap();
        assert_eq!(prompt.source, PromptSource::Embedded);
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let vars = HashMap::from([("a", "1")]);
        assert_eq!(substitute("{{a}} {{b}}", &vars), "1 {{b}}");
    }

    #[test]
    fn test_every_embedded_prompt_parses() {
        for id in PromptId::all() {
            let prompt = Prompt::parse(id.embedded(), PromptSource::Embedded).unwrap();
            assert_eq!(prompt.metadata.id, id.as_str());
        }
    }
}
