//! The system prompt that teaches the model the call protocol

use jay_agent::ToolRegistry;
use jay_agent::protocol::{INTERNAL_CLOSE, INTERNAL_OPEN, INVOCATION_MARKER, RESULT_TAG, TERMINATOR};

/// Persona, protocol rules, the numbered tool list and one worked exchange
pub fn build_system_prompt(registry: &ToolRegistry) -> String {
    let mut prompt = String::from(
        "You are Jay, a friendly and concise personal assistant. You talk with the user \
         in plain sentences and keep answers short unless asked for detail.\n\n",
    );

    prompt.push_str(&format!(
        "You can ask the system to do things for you. To do so, write '{m}' followed by \
         exactly one function call and close it with '{t}'. Write nothing after '{t}'; \
         the system answers on the next line starting with '{r}', and you continue \
         from there. Call one function at a time. Only call the functions listed \
         below, with the arguments shown. Never make up what a function would return.\n\n",
        m = INVOCATION_MARKER,
        t = TERMINATOR,
        r = RESULT_TAG,
    ));

    let tools = registry.describe();
    if !tools.is_empty() {
        prompt.push_str("Functions:\n");
        for (i, line) in tools.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, line));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "If you need to think something through first, write your reasoning between \
         {open} and {close}. The user never sees it.\n\n",
        open = INTERNAL_OPEN,
        close = INTERNAL_CLOSE,
    ));

    prompt.push_str(&format!(
        "Example:\nuser: what's 17 times 23?\n\
         Jay: {open}The user wants a product, the calculator is exact.{close} \
         Let me work that out. {m} _calculator(MATH = \"17 * 23\") {t}\n\
         {r} ['391']\n\
         Jay: 17 times 23 is 391.\n",
        open = INTERNAL_OPEN,
        close = INTERNAL_CLOSE,
        m = INVOCATION_MARKER,
        t = TERMINATOR,
        r = RESULT_TAG,
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::TimeTool;
    use std::sync::Arc;

    #[test]
    fn test_prompt_lists_registered_tools() {
        let registry = ToolRegistry::with_default_aliases().with_tool(Arc::new(TimeTool::new()));
        let prompt = build_system_prompt(&registry);

        assert!(prompt.starts_with("You are Jay"));
        assert!(prompt.contains("1. 'to-system: _time() END_FUNC' - Tells the time and date."));
        assert!(prompt.contains("<jay_internal>"));
        assert!(!prompt.contains("2. "));
    }

    #[test]
    fn test_prompt_without_tools() {
        let prompt = build_system_prompt(&ToolRegistry::new());
        assert!(!prompt.contains("Functions:"));
        assert!(prompt.contains("to-Jay:"));
    }
}
