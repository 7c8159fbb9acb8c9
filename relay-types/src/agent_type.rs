//! Agent type tagging and keyword-based inference.

use serde::{Deserialize, Serialize};

/// Which kind of worker agent a subtask is routed to.
///
/// A closed enum, not an open string: tool selection and prompt assembly
/// branch on it explicitly throughout the Planner and Executor. Adding a
/// type means extending this enum and [`AgentType::infer`] together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Drives a browser: navigation, clicking, form-filling, scraping.
    Browser,
    /// Produces written artifacts: reports, spreadsheets, documents.
    Document,
    /// Writes, runs, or deploys code.
    Code,
    /// Processes images, audio, or other non-text media.
    MultiModal,
}

impl AgentType {
    /// All variants, in the enumeration order used to break inference ties.
    pub const ALL: [AgentType; 4] = [
        AgentType::Browser,
        AgentType::Document,
        AgentType::Code,
        AgentType::MultiModal,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            AgentType::Browser => &["search", "click", "navigate", "browse", "visit", "page"],
            AgentType::Document => &["write", "report", "excel", "document", "spreadsheet", "summarize"],
            AgentType::Code => &["code", "script", "deploy", "implement", "function", "repository"],
            AgentType::MultiModal => &["image", "audio", "ocr", "photo", "video", "transcribe"],
        }
    }

    /// Score and pick the best-fitting agent type for free-form subtask content.
    ///
    /// Counts keyword hits per type in a lowercased copy of `content`.
    /// The highest score wins; ties are broken by [`AgentType::ALL`]
    /// enumeration order; an all-zero score defaults to `Browser`.
    pub fn infer(content: &str) -> AgentType {
        let lowered = content.to_lowercase();
        let mut best = AgentType::Browser;
        let mut best_score = 0usize;
        for ty in AgentType::ALL {
            let score = ty
                .keywords()
                .iter()
                .filter(|kw| lowered.contains(*kw))
                .count();
            if score > best_score {
                best_score = score;
                best = ty;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_browser_from_navigation_keywords() {
        assert_eq!(AgentType::infer("navigate to the pricing page and click sign up"), AgentType::Browser);
    }

    #[test]
    fn infers_code_from_deploy_keyword() {
        assert_eq!(AgentType::infer("implement the function and deploy it"), AgentType::Code);
    }

    #[test]
    fn infers_document_from_report_keyword() {
        assert_eq!(AgentType::infer("write a report summarizing the findings"), AgentType::Document);
    }

    #[test]
    fn infers_multi_modal_from_image_keyword() {
        assert_eq!(AgentType::infer("run ocr over the scanned image"), AgentType::MultiModal);
    }

    #[test]
    fn zero_score_defaults_to_browser() {
        assert_eq!(AgentType::infer("do the thing"), AgentType::Browser);
    }

    #[test]
    fn ties_break_by_enumeration_order() {
        // "search" (browser) and "write" (document) both hit once; browser comes first.
        assert_eq!(AgentType::infer("search and write"), AgentType::Browser);
    }
}
