//! Decomposition prompt template rendering.
//!
//! Substitution order is load-bearing (§4.3 step 6): `{workers_info}` and
//! `{memory_context}` are filled first, `{task}` last — the task text is
//! free-form user input and is substituted only after the other
//! placeholders are gone, so it cannot itself inject a `{workers_info}`
//! or `{memory_context}` placeholder that later substitution would expand.

/// The default decomposition prompt template.
pub const DEFAULT_TEMPLATE: &str = "\
You are decomposing a user request into an ordered set of subtasks.

## Available Workers
{workers_info}

## Memory Context
{memory_context}

## Task
{task}

Respond with a <tasks> block containing one <task id=\"...\" type=\"...\" depends_on=\"...\"> per subtask.";

/// Render `template`, substituting `workers_info` and `memory_context`
/// before `task`, in that fixed order.
pub fn render(template: &str, workers_info: &str, memory_context: &str, task: &str) -> String {
    template
        .replace("{workers_info}", workers_info)
        .replace("{memory_context}", memory_context)
        .replace("{task}", task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_follows_mandated_order() {
        let template = "{workers_info}|{memory_context}|{task}";
        let rendered = render(template, "browser, code", "no prior context", "{memory_context} injected");
        assert_eq!(rendered, "browser, code|no prior context|{memory_context} injected");
    }

    #[test]
    fn task_text_cannot_expand_into_earlier_placeholders() {
        let template = "{workers_info}-{task}";
        let rendered = render(template, "{task}", "unused", "real task text");
        assert_eq!(rendered, "{task}-real task text");
    }
}
