//! System prompts for each derivation action.

use crate::model::ActionType;
use std::collections::HashMap;

/// A system prompt and the identifier it is logged under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub id: String,
    pub system: String,
}

/// Maps an action to its system prompt.
pub trait PromptLoader: Send + Sync {
    fn prompt(&self, action: ActionType) -> Prompt;
}

const OUTPUT_CONTRACT: &str = "只输出一个 JSON 对象，格式为 {\"items\": [...]}，不要输出其他文字。\
每个条目包含 title、summary、content（纯文本）、refs（引用的实体 id 或名称数组）、risk_flags（风险提示数组）。";

fn builtin(action: ActionType) -> &'static str {
    match action {
        ActionType::Outline => "你是剧本杀编剧助手。根据给定的真相文档，提炼故事大纲，每个条目是一个剧情段落。",
        ActionType::Worldcheck => "你是剧本杀世界观审校。检查真相文档中的设定矛盾、动机缺失与时间线漏洞，每个条目是一个风险点；严重到必须修改的在 risk_flags 中标注 \"P0\"。",
        ActionType::Story => "你是剧本杀编剧助手。根据真相文档扩写故事正文，每个条目是一个章节。",
        ActionType::Role => "你是剧本杀角色设计师。根据真相文档生成角色，每个条目的 meta 包含 motivation（动机）、secret（秘密）、goal（目标）。",
        ActionType::Clue => "你是剧本杀线索设计师。根据真相文档生成线索，每个条目的 meta 包含 refRoleIds（关联角色名数组）、time（出现时间）、location（地点）。",
        ActionType::Timeline => "你是剧本杀时间线整理员。根据真相文档生成时间线，每个条目的 meta 包含 timePoint（时间点）、participants（在场角色名数组）、location（地点）。",
        ActionType::Dm => "你是剧本杀主持人手册编写者。根据真相文档编写主持流程，每个条目是一个章节，meta 包含 chapter（序号）与 notes（主持提示）。",
    }
}

/// Built-in prompts, with optional per-action overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticPrompts {
    overrides: HashMap<ActionType, String>,
}

impl StaticPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the prompt used for one action.
    pub fn with_override(mut self, action: ActionType, system: impl Into<String>) -> Self {
        self.overrides.insert(action, system.into());
        self
    }
}

impl PromptLoader for StaticPrompts {
    fn prompt(&self, action: ActionType) -> Prompt {
        match self.overrides.get(&action) {
            Some(system) => Prompt {
                id: format!("{action}.custom"),
                system: system.clone(),
            },
            None => Prompt {
                id: format!("{action}.v1"),
                system: format!("{}\n{OUTPUT_CONTRACT}", builtin(action)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_prompts_carry_output_contract() {
        let prompts = StaticPrompts::new();
        for action in ActionType::ALL {
            let prompt = prompts.prompt(action);
            assert_eq!(prompt.id, format!("{action}.v1"));
            assert!(prompt.system.contains("\"items\""));
        }
    }

    #[test]
    fn test_override() {
        let prompts = StaticPrompts::new().with_override(ActionType::Clue, "custom");
        let prompt = prompts.prompt(ActionType::Clue);
        assert_eq!(prompt.id, "clue.custom");
        assert_eq!(prompt.system, "custom");
    }
}
