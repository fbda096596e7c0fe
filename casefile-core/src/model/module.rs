//! Derived modules: roles, clues, timeline items and run-book chapters.

use super::ids::{EntryId, ProjectId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A category of derived content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Role,
    Clue,
    Timeline,
    /// The DM run-book.
    Dm,
}

impl ModuleKind {
    /// Every module a publishable project must have content for.
    pub const REQUIRED: [ModuleKind; 4] = [
        ModuleKind::Role,
        ModuleKind::Clue,
        ModuleKind::Timeline,
        ModuleKind::Dm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Role => "role",
            ModuleKind::Clue => "clue",
            ModuleKind::Timeline => "timeline",
            ModuleKind::Dm => "dm",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes of a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMeta {
    #[serde(default)]
    pub motivation: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
}

/// Attributes of a clue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClueMeta {
    /// Roles the clue is bound to, by entry id or name.
    #[serde(default)]
    pub ref_role_ids: Vec<String>,
    /// When the clue appears during play.
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Attributes of a timeline item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineMeta {
    #[serde(default)]
    pub time_point: Option<String>,
    /// Raw participant strings; an element may itself list several names.
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Attributes of a run-book chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmMeta {
    #[serde(default)]
    pub chapter: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Typed per-module attributes of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryMeta {
    Role(RoleMeta),
    Clue(ClueMeta),
    Timeline(TimelineMeta),
    Dm(DmMeta),
}

impl EntryMeta {
    /// Empty attributes for a module.
    pub fn empty(kind: ModuleKind) -> Self {
        match kind {
            ModuleKind::Role => EntryMeta::Role(RoleMeta::default()),
            ModuleKind::Clue => EntryMeta::Clue(ClueMeta::default()),
            ModuleKind::Timeline => EntryMeta::Timeline(TimelineMeta::default()),
            ModuleKind::Dm => EntryMeta::Dm(DmMeta::default()),
        }
    }

    /// The module this attribute shape belongs to.
    pub fn kind(&self) -> ModuleKind {
        match self {
            EntryMeta::Role(_) => ModuleKind::Role,
            EntryMeta::Clue(_) => ModuleKind::Clue,
            EntryMeta::Timeline(_) => ModuleKind::Timeline,
            EntryMeta::Dm(_) => ModuleKind::Dm,
        }
    }

    /// Build typed attributes from loosely shaped model output.
    ///
    /// Looks inside a nested `meta` object first, then at the top level, and
    /// accepts both camelCase and snake_case keys. `refs` backs up a clue's role
    /// binding when the item carries none of its own. Never fails.
    pub fn from_attributes(kind: ModuleKind, attrs: &Map<String, Value>, refs: &[String]) -> Self {
        let get = |keys: &[&str]| lookup(attrs, keys);
        match kind {
            ModuleKind::Role => EntryMeta::Role(RoleMeta {
                motivation: get(&["motivation", "motive"]).and_then(as_text),
                secret: get(&["secret"]).and_then(as_text),
                goal: get(&["goal", "objective"]).and_then(as_text),
            }),
            ModuleKind::Clue => {
                let mut ref_role_ids = get(&["refRoleIds", "ref_role_ids", "roleIds", "roles"])
                    .map(as_text_list)
                    .unwrap_or_default();
                if ref_role_ids.is_empty() {
                    ref_role_ids = refs.to_vec();
                }
                EntryMeta::Clue(ClueMeta {
                    ref_role_ids,
                    time: get(&["time", "appearTime", "appear_time"]).and_then(as_text),
                    location: get(&["location", "place"]).and_then(as_text),
                })
            }
            ModuleKind::Timeline => EntryMeta::Timeline(TimelineMeta {
                time_point: get(&["timePoint", "time_point", "time"]).and_then(as_text),
                participants: get(&["participants", "roles"])
                    .map(as_text_list)
                    .unwrap_or_default(),
                location: get(&["location", "place"]).and_then(as_text),
            }),
            ModuleKind::Dm => EntryMeta::Dm(DmMeta {
                chapter: get(&["chapter", "index"])
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok()),
                notes: get(&["notes", "note"]).and_then(as_text),
            }),
        }
    }
}

fn lookup<'a>(attrs: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    let nested = attrs.get("meta").and_then(Value::as_object);
    keys.iter()
        .find_map(|k| nested.and_then(|m| m.get(*k)))
        .or_else(|| keys.iter().find_map(|k| attrs.get(*k)))
        .filter(|v| !v.is_null())
}

/// Scalar JSON rendered as text; structures are ignored.
pub(crate) fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_text_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(as_text).collect(),
        other => as_text(other).into_iter().collect(),
    }
}

/// One item within a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEntry {
    pub id: EntryId,
    pub project_id: ProjectId,
    pub module: ModuleKind,
    /// Snapshot a derived entry was generated from; `None` for hand-written entries.
    #[serde(default)]
    pub snapshot_id: Option<SnapshotId>,
    pub name: String,
    pub meta: EntryMeta,
    /// Rich document payload.
    pub content: Value,
    #[serde(default)]
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleEntry {
    pub fn new(project_id: ProjectId, name: impl Into<String>, meta: EntryMeta) -> Self {
        let now = Utc::now();
        Self {
            id: EntryId::new(),
            project_id,
            module: meta.kind(),
            snapshot_id: None,
            name: name.into(),
            meta,
            content: crate::document::empty(),
            needs_review: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_snapshot(mut self, snapshot_id: SnapshotId) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn flagged_for_review(mut self) -> Self {
        self.needs_review = true;
        self
    }
}

/// The ordered entries of one module within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCollection {
    pub project_id: ProjectId,
    pub module: ModuleKind,
    pub entries: Vec<ModuleEntry>,
    /// Entry open in an editor, if any.
    #[serde(default)]
    pub active: Option<EntryId>,
}

impl ModuleCollection {
    pub fn new(project_id: ProjectId, module: ModuleKind) -> Self {
        Self {
            project_id,
            module,
            entries: Vec::new(),
            active: None,
        }
    }

    /// Insert or replace an entry, keeping its position when it already exists.
    pub fn upsert(&mut self, entry: ModuleEntry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Swap every derived entry, whatever snapshot it came from, for
    /// `replacements`. Hand-written entries stay in place.
    pub fn replace_derived(&mut self, replacements: Vec<ModuleEntry>) {
        self.entries.retain(|e| e.snapshot_id.is_none());
        if let Some(active) = self.active {
            if !self.entries.iter().any(|e| e.id == active) {
                self.active = None;
            }
        }
        self.entries.extend(replacements);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_role_meta_from_nested_meta() {
        let meta = EntryMeta::from_attributes(
            ModuleKind::Role,
            &attrs(json!({"name": "管家", "meta": {"motivation": "复仇"}})),
            &[],
        );
        assert_eq!(
            meta,
            EntryMeta::Role(RoleMeta {
                motivation: Some("复仇".into()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_clue_meta_falls_back_to_refs() {
        let meta = EntryMeta::from_attributes(
            ModuleKind::Clue,
            &attrs(json!({"time": 2100})),
            &["role-1".to_string()],
        );
        let EntryMeta::Clue(clue) = meta else {
            panic!("expected clue meta");
        };
        assert_eq!(clue.ref_role_ids, vec!["role-1"]);
        assert_eq!(clue.time.as_deref(), Some("2100"));
    }

    #[test]
    fn test_timeline_meta_accepts_snake_case_and_string_participants() {
        let meta = EntryMeta::from_attributes(
            ModuleKind::Timeline,
            &attrs(json!({"time_point": "20:00", "participants": "A，B"})),
            &[],
        );
        let EntryMeta::Timeline(item) = meta else {
            panic!("expected timeline meta");
        };
        assert_eq!(item.time_point.as_deref(), Some("20:00"));
        assert_eq!(item.participants, vec!["A，B"]);
    }

    #[test]
    fn test_meta_serializes_with_camel_case_keys() {
        let meta = EntryMeta::Clue(ClueMeta {
            ref_role_ids: vec!["r".into()],
            time: Some("21:00".into()),
            location: None,
        });
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["kind"], "clue");
        assert_eq!(value["refRoleIds"][0], "r");
    }

    #[test]
    fn test_replace_derived_keeps_hand_written_entries() {
        let project = ProjectId::new();
        let snapshot = SnapshotId::new();
        let mut collection = ModuleCollection::new(project, ModuleKind::Role);
        let manual = ModuleEntry::new(project, "手写", EntryMeta::empty(ModuleKind::Role));
        let derived = ModuleEntry::new(project, "旧", EntryMeta::empty(ModuleKind::Role))
            .with_snapshot(snapshot);
        collection.active = Some(derived.id);
        collection.upsert(manual.clone());
        collection.upsert(derived);

        let fresh = ModuleEntry::new(project, "新", EntryMeta::empty(ModuleKind::Role))
            .with_snapshot(snapshot);
        collection.replace_derived(vec![fresh]);

        let names: Vec<_> = collection.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["手写", "新"]);
        assert_eq!(collection.active, None);
    }

    #[test]
    fn test_replace_derived_drops_entries_of_older_snapshots() {
        let project = ProjectId::new();
        let mut collection = ModuleCollection::new(project, ModuleKind::Timeline);
        let manual = ModuleEntry::new(project, "手写", EntryMeta::empty(ModuleKind::Timeline));
        collection.upsert(manual);
        collection.upsert(
            ModuleEntry::new(project, "v1", EntryMeta::empty(ModuleKind::Timeline))
                .with_snapshot(SnapshotId::new()),
        );

        let fresh = ModuleEntry::new(project, "v2", EntryMeta::empty(ModuleKind::Timeline))
            .with_snapshot(SnapshotId::new());
        collection.replace_derived(vec![fresh]);

        let names: Vec<_> = collection.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["手写", "v2"]);
    }
}
