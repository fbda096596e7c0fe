//! Cross-entity consistency rules.
//!
//! Every rule is a pure function of the module collections. Malformed data is
//! reported as findings or skipped, never an error.

use crate::model::{
    ClueMeta, EntityRef, EntryMeta, Finding, IssueCode, ModuleCollection, ModuleEntry,
    ModuleKind, RoleMeta, Severity, TimelineMeta,
};
use std::collections::{HashMap, HashSet};

/// Run every rule over the collections, in collection order.
pub fn check(collections: &[ModuleCollection]) -> Vec<Finding> {
    let roles = RoleIndex::new(entries_of(collections, ModuleKind::Role));
    let mut timeline = TimelineTracker::default();
    let mut findings = Vec::new();

    for collection in collections {
        for entry in &collection.entries {
            if entry.meta.kind() != collection.module || entry.module != collection.module {
                continue;
            }
            match &entry.meta {
                EntryMeta::Role(meta) => findings.extend(check_role(entry, meta)),
                EntryMeta::Clue(meta) => {
                    findings.extend(check_clue_bound(entry, meta));
                    findings.extend(check_clue_refs(entry, meta, &roles));
                }
                EntryMeta::Timeline(meta) => findings.extend(timeline.observe(entry, meta)),
                EntryMeta::Dm(_) => {}
            }
        }
    }
    findings
}

fn entries_of(
    collections: &[ModuleCollection],
    module: ModuleKind,
) -> impl Iterator<Item = &ModuleEntry> {
    collections
        .iter()
        .filter(move |c| c.module == module)
        .flat_map(|c| c.entries.iter())
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |s| s.trim().is_empty())
}

fn entry_ref(entry: &ModuleEntry) -> EntityRef {
    EntityRef::entry(entry.module, entry.id, entry.name.clone())
}

fn check_role(entry: &ModuleEntry, meta: &RoleMeta) -> Option<Finding> {
    if !blank(meta.motivation.as_deref()) {
        return None;
    }
    Some(Finding {
        code: IssueCode::RoleMotiveEmpty,
        severity: Severity::P1,
        title: "角色缺少动机".to_string(),
        description: format!("角色「{}」没有填写动机", entry.name),
        refs: vec![entry_ref(entry)],
    })
}

fn check_clue_bound(entry: &ModuleEntry, meta: &ClueMeta) -> Option<Finding> {
    let unbound = meta.ref_role_ids.iter().all(|r| r.trim().is_empty());
    let untimed = blank(meta.time.as_deref());
    if !unbound && !untimed {
        return None;
    }

    let missing = match (unbound, untimed) {
        (true, true) => "关联角色与出现时间",
        (true, false) => "关联角色",
        _ => "出现时间",
    };
    Some(Finding {
        code: IssueCode::ClueUnbound,
        severity: Severity::P1,
        title: "线索未绑定".to_string(),
        description: format!("线索「{}」缺少{missing}", entry.name),
        refs: vec![entry_ref(entry)],
    })
}

/// Role entries addressable by id or by name.
struct RoleIndex<'a> {
    by_key: HashMap<String, &'a ModuleEntry>,
}

impl<'a> RoleIndex<'a> {
    fn new(roles: impl Iterator<Item = &'a ModuleEntry>) -> Self {
        let mut by_key = HashMap::new();
        for role in roles {
            by_key.entry(role.id.to_string()).or_insert(role);
            let name = role.name.trim();
            if !name.is_empty() {
                by_key.entry(name.to_string()).or_insert(role);
            }
        }
        Self { by_key }
    }

    fn resolve(&self, reference: &str) -> Option<&'a ModuleEntry> {
        self.by_key.get(reference.trim()).copied()
    }
}

fn check_clue_refs(entry: &ModuleEntry, meta: &ClueMeta, roles: &RoleIndex<'_>) -> Vec<Finding> {
    meta.ref_role_ids
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty() && roles.resolve(r).is_none())
        .map(|dangling| Finding {
            code: IssueCode::ClueRefDangling,
            severity: Severity::P1,
            title: "线索引用了不存在的角色".to_string(),
            description: format!("线索「{}」关联的角色「{dangling}」不存在", entry.name),
            refs: vec![entry_ref(entry), EntityRef::opaque(dangling)],
        })
        .collect()
}

/// Characters that separate names in a participant string. Whitespace,
/// including the ideographic space, also separates.
const PARTICIPANT_DELIMITERS: [char; 5] = [',', '，', '、', '/', '／'];

/// Split raw participant strings into distinct trimmed names, keeping first
/// occurrence order.
pub fn split_participants(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .flat_map(|s| s.split(|c: char| c.is_whitespace() || PARTICIPANT_DELIMITERS.contains(&c)))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

/// Participants seen so far at each time point, with the entry that first
/// placed each participant there.
#[derive(Default)]
struct TimelineTracker {
    seen: HashMap<String, HashMap<String, EntityRef>>,
}

impl TimelineTracker {
    fn observe(&mut self, entry: &ModuleEntry, meta: &TimelineMeta) -> Option<Finding> {
        let time_point = meta.time_point.as_deref().map(str::trim).unwrap_or_default();
        let participants = split_participants(&meta.participants);
        if time_point.is_empty() || participants.is_empty() {
            return None;
        }

        let at_time = self.seen.entry(time_point.to_string()).or_default();
        let finding = participants
            .iter()
            .find_map(|p| at_time.get(p).map(|earlier| (p, earlier.clone())))
            .map(|(participant, earlier)| Finding {
                code: IssueCode::TimelineConflict,
                severity: Severity::P0,
                title: "时间线冲突".to_string(),
                description: format!(
                    "{participant} 在 {time_point} 同时出现在「{}」与「{}」",
                    earlier.name.as_deref().unwrap_or_default(),
                    entry.name
                ),
                refs: vec![earlier, entry_ref(entry)],
            });

        for participant in participants {
            at_time.entry(participant).or_insert_with(|| entry_ref(entry));
        }
        finding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DmMeta, ProjectId};
    use pretty_assertions::assert_eq;

    fn collection(project: ProjectId, module: ModuleKind, entries: Vec<ModuleEntry>) -> ModuleCollection {
        let mut collection = ModuleCollection::new(project, module);
        for entry in entries {
            collection.upsert(entry);
        }
        collection
    }

    fn timeline_item(project: ProjectId, name: &str, time: &str, participants: &[&str]) -> ModuleEntry {
        ModuleEntry::new(
            project,
            name,
            EntryMeta::Timeline(TimelineMeta {
                time_point: Some(time.to_string()),
                participants: participants.iter().map(|p| p.to_string()).collect(),
                location: None,
            }),
        )
    }

    #[test]
    fn test_split_participants() {
        let raw = vec![
            "甲，乙、丙".to_string(),
            "丁/戊／己 庚\u{3000}辛".to_string(),
            " 甲 ,,".to_string(),
        ];
        assert_eq!(
            split_participants(&raw),
            vec!["甲", "乙", "丙", "丁", "戊", "己", "庚", "辛"]
        );
    }

    #[test]
    fn test_timeline_chain_reports_each_overlap() {
        let project = ProjectId::new();
        let timeline = collection(
            project,
            ModuleKind::Timeline,
            vec![
                timeline_item(project, "t1", "20:00", &["A", "B"]),
                timeline_item(project, "t2", "20:00", &["C", "D"]),
                timeline_item(project, "t3", "20:00", &["D", "E"]),
                timeline_item(project, "t4", "20:00", &["E"]),
                timeline_item(project, "t5", "21:00", &["A"]),
            ],
        );

        let findings = check(&[timeline]);
        let described: Vec<_> = findings.iter().map(|f| f.description.as_str()).collect();
        assert_eq!(
            described,
            vec![
                "D 在 20:00 同时出现在「t2」与「t3」",
                "E 在 20:00 同时出现在「t3」与「t4」",
            ]
        );
        assert!(findings.iter().all(|f| f.severity == Severity::P0));
    }

    #[test]
    fn test_timeline_skips_entries_without_time_or_participants() {
        let project = ProjectId::new();
        let timeline = collection(
            project,
            ModuleKind::Timeline,
            vec![
                timeline_item(project, "t1", "  ", &["A"]),
                timeline_item(project, "t2", "20:00", &[" ", "，"]),
                timeline_item(project, "t3", "20:00", &["A"]),
            ],
        );
        assert!(check(&[timeline]).is_empty());
    }

    #[test]
    fn test_clue_refs_resolve_by_id_or_name() {
        let project = ProjectId::new();
        let butler = ModuleEntry::new(
            project,
            "管家",
            EntryMeta::Role(RoleMeta {
                motivation: Some("复仇".into()),
                ..Default::default()
            }),
        );
        let clue = |name: &str, refs: Vec<String>| {
            ModuleEntry::new(
                project,
                name,
                EntryMeta::Clue(ClueMeta {
                    ref_role_ids: refs,
                    time: Some("第一幕".into()),
                    location: None,
                }),
            )
        };
        let collections = vec![
            collection(project, ModuleKind::Role, vec![butler.clone()]),
            collection(
                project,
                ModuleKind::Clue,
                vec![
                    clue("by-id", vec![butler.id.to_string()]),
                    clue("by-name", vec!["管家".into()]),
                    clue("ghost", vec!["园丁".into()]),
                ],
            ),
        ];

        let findings = check(&collections);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, IssueCode::ClueRefDangling);
        assert_eq!(findings[0].refs[1], EntityRef::opaque("园丁"));
    }

    #[test]
    fn test_clue_unbound_names_what_is_missing() {
        let project = ProjectId::new();
        let clue = ModuleEntry::new(project, "匕首", EntryMeta::empty(ModuleKind::Clue));
        let findings = check(&[collection(project, ModuleKind::Clue, vec![clue])]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, IssueCode::ClueUnbound);
        assert_eq!(findings[0].description, "线索「匕首」缺少关联角色与出现时间");
    }

    #[test]
    fn test_mismatched_meta_is_skipped() {
        let project = ProjectId::new();
        let mut stray = ModuleEntry::new(project, "stray", EntryMeta::Dm(DmMeta::default()));
        stray.module = ModuleKind::Role;
        let findings = check(&[collection(project, ModuleKind::Role, vec![stray])]);
        assert!(findings.is_empty());
    }
}
