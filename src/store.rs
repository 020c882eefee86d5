//! Tool and category metadata.
//!
//! The store is a TOML document holding `[[tool]]` and `[[category]]` tables. Every
//! mutation is written back immediately. The supervisor never reads it; callers pass a
//! record's `command` and `working_directory` to `Supervisor::launch`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// A launchable tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub working_directory: PathBuf,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ToolRecord {
    // `needle` must already be lowercase.
    fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
    }
}

/// Fields of a tool before it is assigned an id.
#[derive(Debug, Clone, Default)]
pub struct NewTool {
    pub name: String,
    pub description: String,
    pub category: String,
    pub working_directory: PathBuf,
    pub command: String,
    pub web_url: Option<String>,
    pub tags: Vec<String>,
    pub icon: Option<String>,
}

/// A partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ToolPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub command: Option<String>,
    pub web_url: Option<String>,
    pub tags: Option<Vec<String>>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default, rename = "tool")]
    tools: Vec<ToolRecord>,
    #[serde(default = "default_categories", rename = "category")]
    categories: Vec<Category>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            categories: default_categories(),
        }
    }
}

fn default_categories() -> Vec<Category> {
    [
        ("ai-video", "AI 视频"),
        ("ai-audio", "AI 音频"),
        ("ai-image", "AI 图像"),
        ("dev-tools", "开发工具"),
        ("other", "其他"),
    ]
    .into_iter()
    .map(|(id, name)| Category {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

/// File-backed tool and category store.
#[derive(Debug)]
pub struct ToolStore {
    path: PathBuf,
    document: StoreDocument,
}

impl ToolStore {
    /// Opens the store at `path`. A missing file yields an empty store with the
    /// default categories; nothing is written until the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let document = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> StoreResult<()> {
        let raw = toml::to_string_pretty(&self.document)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, raw).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn tools(&self) -> &[ToolRecord] {
        &self.document.tools
    }

    pub fn tool(&self, id: &str) -> Option<&ToolRecord> {
        self.document.tools.iter().find(|tool| tool.id == id)
    }

    /// Tools in `category` whose name, description or tags contain `query`.
    ///
    /// The query is case-insensitive; a blank query matches everything. `category`
    /// may be a category id or its display name.
    pub fn search<'a>(
        &'a self,
        query: Option<&str>,
        category: Option<&'a str>,
    ) -> impl Iterator<Item = &'a ToolRecord> + 'a {
        let needle = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        let wanted: Option<Vec<&'a str>> = category.map(|wanted| {
            match self
                .document
                .categories
                .iter()
                .find(|c| c.id == wanted || c.name == wanted)
            {
                Some(found) => vec![found.id.as_str(), found.name.as_str()],
                None => vec![wanted],
            }
        });
        self.document.tools.iter().filter(move |tool| {
            let in_category = wanted
                .as_ref()
                .map_or(true, |names| names.contains(&tool.category.as_str()));
            in_category && needle.as_deref().map_or(true, |q| tool.matches(q))
        })
    }

    pub fn add_tool(&mut self, tool: NewTool) -> StoreResult<ToolRecord> {
        let record = ToolRecord {
            id: Uuid::new_v4().to_string(),
            name: tool.name,
            description: tool.description,
            category: tool.category,
            working_directory: tool.working_directory,
            command: tool.command,
            web_url: tool.web_url,
            tags: tool.tags,
            icon: tool.icon,
        };
        self.document.tools.push(record.clone());
        self.save()?;
        Ok(record)
    }

    pub fn update_tool(&mut self, id: &str, patch: ToolPatch) -> StoreResult<ToolRecord> {
        let tool = self
            .document
            .tools
            .iter_mut()
            .find(|tool| tool.id == id)
            .ok_or_else(|| StoreError::UnknownTool(id.to_string()))?;
        if let Some(name) = patch.name {
            tool.name = name;
        }
        if let Some(description) = patch.description {
            tool.description = description;
        }
        if let Some(category) = patch.category {
            tool.category = category;
        }
        if let Some(working_directory) = patch.working_directory {
            tool.working_directory = working_directory;
        }
        if let Some(command) = patch.command {
            tool.command = command;
        }
        if let Some(web_url) = patch.web_url {
            tool.web_url = Some(web_url);
        }
        if let Some(tags) = patch.tags {
            tool.tags = tags;
        }
        if let Some(icon) = patch.icon {
            tool.icon = Some(icon);
        }
        let updated = tool.clone();
        self.save()?;
        Ok(updated)
    }

    pub fn remove_tool(&mut self, id: &str) -> StoreResult<ToolRecord> {
        let index = self
            .document
            .tools
            .iter()
            .position(|tool| tool.id == id)
            .ok_or_else(|| StoreError::UnknownTool(id.to_string()))?;
        let removed = self.document.tools.remove(index);
        self.save()?;
        Ok(removed)
    }

    pub fn categories(&self) -> &[Category] {
        &self.document.categories
    }

    pub fn add_category(&mut self, name: impl Into<String>) -> StoreResult<Category> {
        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
        };
        self.document.categories.push(category.clone());
        self.save()?;
        Ok(category)
    }

    pub fn remove_category(&mut self, id: &str) -> StoreResult<Category> {
        let index = self
            .document
            .categories
            .iter()
            .position(|category| category.id == id)
            .ok_or_else(|| StoreError::UnknownCategory(id.to_string()))?;
        let removed = self.document.categories.remove(index);
        self.save()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool() -> NewTool {
        NewTool {
            name: "ComfyUI".into(),
            category: "ai-image".into(),
            working_directory: PathBuf::from("/opt/comfyui"),
            command: "python main.py --listen".into(),
            web_url: Some("http://127.0.0.1:8188".into()),
            tags: vec!["gpu".into()],
            ..NewTool::default()
        }
    }

    #[test]
    fn missing_file_has_default_categories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolStore::open(dir.path().join("tools.toml")).unwrap();
        assert!(store.tools().is_empty());
        let ids: Vec<_> = store.categories().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["ai-video", "ai-audio", "ai-image", "dev-tools", "other"]);
        assert!(!dir.path().join("tools.toml").exists());
    }

    #[test]
    fn tools_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/tools.toml");
        let mut store = ToolStore::open(&path).unwrap();
        let added = store.add_tool(sample_tool()).unwrap();
        assert!(Uuid::parse_str(&added.id).is_ok());

        let reopened = ToolStore::open(&path).unwrap();
        assert_eq!(reopened.tool(&added.id), Some(&added));
        assert_eq!(reopened.categories().len(), 5);
    }

    #[test]
    fn update_changes_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ToolStore::open(dir.path().join("tools.toml")).unwrap();
        let added = store.add_tool(sample_tool()).unwrap();
        let updated = store
            .update_tool(
                &added.id,
                ToolPatch {
                    command: Some("python main.py --port 9000".into()),
                    ..ToolPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.command, "python main.py --port 9000");
        assert_eq!(updated.name, "ComfyUI");
        assert_eq!(updated.tags, vec!["gpu".to_string()]);
    }

    #[test]
    fn unknown_ids_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ToolStore::open(dir.path().join("tools.toml")).unwrap();
        assert!(matches!(
            store.remove_tool("nope"),
            Err(StoreError::UnknownTool(id)) if id == "nope"
        ));
        assert!(matches!(
            store.remove_category("nope"),
            Err(StoreError::UnknownCategory(_))
        ));
    }

    #[test]
    fn categories_can_be_added_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ToolStore::open(dir.path().join("tools.toml")).unwrap();
        let added = store.add_category("LLM").unwrap();
        assert_eq!(store.categories().len(), 6);
        store.remove_category(&added.id).unwrap();
        store.remove_category("other").unwrap();
        assert_eq!(store.categories().len(), 4);
    }

    fn seeded_store(dir: &Path) -> ToolStore {
        let mut store = ToolStore::open(dir.join("tools.toml")).unwrap();
        store.add_tool(sample_tool()).unwrap();
        store
            .add_tool(NewTool {
                name: "Whisper WebUI".into(),
                description: "Speech to text".into(),
                category: "ai-audio".into(),
                working_directory: PathBuf::from("/opt/whisper"),
                command: "python app.py".into(),
                tags: vec!["Transcribe".into()],
                ..NewTool::default()
            })
            .unwrap();
        store
            .add_tool(NewTool {
                name: "Vite dev".into(),
                category: "dev-tools".into(),
                working_directory: PathBuf::from("/src/site"),
                command: "npm run dev".into(),
                ..NewTool::default()
            })
            .unwrap();
        store
    }

    fn names<'a>(tools: impl Iterator<Item = &'a ToolRecord>) -> Vec<&'a str> {
        tools.map(|tool| tool.name.as_str()).collect()
    }

    #[test]
    fn search_matches_tags_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        assert_eq!(names(store.search(Some("transcribe"), None)), ["Whisper WebUI"]);
        assert_eq!(names(store.search(Some("GPU"), None)), ["ComfyUI"]);
        assert_eq!(names(store.search(Some("SPEECH"), None)), ["Whisper WebUI"]);
        assert!(store.search(Some("nothing like it"), None).next().is_none());
    }

    #[test]
    fn blank_query_matches_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        assert_eq!(store.search(None, None).count(), 3);
        assert_eq!(store.search(Some("  "), None).count(), 3);
    }

    #[test]
    fn search_filters_by_category_id_or_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        assert_eq!(names(store.search(None, Some("dev-tools"))), ["Vite dev"]);
        assert_eq!(names(store.search(None, Some("AI 音频"))), ["Whisper WebUI"]);
        assert!(store.search(Some("vite"), Some("ai-image")).next().is_none());
        assert!(store.search(None, Some("unknown")).next().is_none());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.toml");
        std::fs::write(&path, "[[tool]]\nname = 3\n").unwrap();
        assert!(matches!(
            ToolStore::open(&path),
            Err(StoreError::Parse { .. })
        ));
    }
}
