// src/agent/modes.rs
// Turn-local safety modes. Both flags are one-way within a turn, and both
// filters apply conjunctively, so each successive tool set is a subset of
// the previous one.

use crate::llm::Tool;

/// Tools whose results may be attacker-controlled. Executing any of these
/// flips the turn into isolated mode.
pub const UNTRUSTED_CONTENT_TOOLS: &[&str] = &["browse", "web_search", "generate_code"];

/// State-mutating tools stripped in isolated mode. Read-only recall and
/// time tools stay available.
pub const MUTATING_TOOLS: &[&str] = &[
    "save_memory",
    "forget_memory",
    "mark_sensitive",
    "save_note",
    "delete_note",
    "set_cron",
    "delete_cron",
    "deploy_app",
    "remove_app",
    "send_message",
];

/// The only tools advertised when a local fallback model is answering.
pub const DEGRADED_ALLOWED_TOOLS: &[&str] = &[
    "recall_memory",
    "current_time",
    "usage",
    "list_crons",
    "get_note",
    "list_notes",
    "list_providers",
    "current_model",
];

pub fn is_untrusted_content_tool(name: &str) -> bool {
    UNTRUSTED_CONTENT_TOOLS.contains(&name)
}

/// The per-turn mode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnModes {
    pub isolated: bool,
    pub degraded: bool,
}

impl TurnModes {
    /// Irreversible within the turn.
    pub fn mark_isolated(&mut self) {
        if !self.isolated {
            tracing::info!("Turn entering isolated mode: untrusted content seen");
            self.isolated = true;
        }
    }

    /// Irreversible within the turn.
    pub fn mark_degraded(&mut self) {
        if !self.degraded {
            tracing::info!("Turn entering degraded mode: local fallback model active");
            self.degraded = true;
        }
    }

    /// Whether a tool may be advertised and executed under these modes.
    pub fn allows(&self, name: &str) -> bool {
        if self.degraded && !DEGRADED_ALLOWED_TOOLS.contains(&name) {
            return false;
        }
        if self.isolated && MUTATING_TOOLS.contains(&name) {
            return false;
        }
        true
    }

    /// Filter an advertised tool set down to what these modes allow.
    pub fn filter_tools(&self, tools: Vec<Tool>) -> Vec<Tool> {
        tools
            .into_iter()
            .filter(|t| self.allows(&t.function.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toolset(names: &[&str]) -> Vec<Tool> {
        names
            .iter()
            .map(|n| Tool::function(*n, "", json!({"type": "object"})))
            .collect()
    }

    fn names(tools: &[Tool]) -> Vec<&str> {
        tools.iter().map(|t| t.function.name.as_str()).collect()
    }

    #[test]
    fn test_normal_mode_allows_everything() {
        let modes = TurnModes::default();
        assert!(modes.allows("save_memory"));
        assert!(modes.allows("deploy_app"));
        assert!(modes.allows("recall_memory"));
    }

    #[test]
    fn test_isolated_strips_mutating_tools() {
        let mut modes = TurnModes::default();
        modes.mark_isolated();

        let filtered = modes.filter_tools(toolset(&[
            "recall_memory",
            "save_memory",
            "save_note",
            "set_cron",
            "deploy_app",
            "current_time",
            "browse",
        ]));
        let kept = names(&filtered);
        assert!(kept.contains(&"recall_memory"));
        assert!(kept.contains(&"current_time"));
        assert!(kept.contains(&"browse"));
        assert!(!kept.contains(&"save_memory"));
        assert!(!kept.contains(&"save_note"));
        assert!(!kept.contains(&"set_cron"));
        assert!(!kept.contains(&"deploy_app"));
    }

    #[test]
    fn test_degraded_is_allow_list_only() {
        let mut modes = TurnModes::default();
        modes.mark_degraded();

        let filtered = modes.filter_tools(toolset(&[
            "recall_memory",
            "save_memory",
            "browse",
            "current_time",
            "deploy_app",
        ]));
        let kept = names(&filtered);
        assert_eq!(kept, vec!["recall_memory", "current_time"]);
    }

    #[test]
    fn test_mode_filters_are_monotonic() {
        // Every successive set is a subset of the previous one, whichever
        // order the flags flip in.
        let all = toolset(&[
            "recall_memory",
            "save_memory",
            "browse",
            "current_time",
            "usage",
            "deploy_app",
            "list_crons",
        ]);

        let mut modes = TurnModes::default();
        let set0: Vec<String> = names(&modes.filter_tools(all.clone()))
            .into_iter()
            .map(String::from)
            .collect();

        modes.mark_isolated();
        let set1: Vec<String> = names(&modes.filter_tools(all.clone()))
            .into_iter()
            .map(String::from)
            .collect();
        assert!(set1.iter().all(|n| set0.contains(n)));

        modes.mark_degraded();
        let set2: Vec<String> = names(&modes.filter_tools(all))
            .into_iter()
            .map(String::from)
            .collect();
        assert!(set2.iter().all(|n| set1.contains(n)));
    }

    #[test]
    fn test_degraded_allow_list_is_read_only() {
        // The degraded allow-list must never include a mutating tool,
        // otherwise flipping isolated after degraded could widen the set.
        for name in DEGRADED_ALLOWED_TOOLS {
            assert!(!MUTATING_TOOLS.contains(name), "{name} is mutating");
        }
    }

    #[test]
    fn test_untrusted_group() {
        assert!(is_untrusted_content_tool("browse"));
        assert!(is_untrusted_content_tool("web_search"));
        assert!(is_untrusted_content_tool("generate_code"));
        assert!(!is_untrusted_content_tool("recall_memory"));
    }
}
