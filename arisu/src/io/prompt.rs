//! System prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::agent::{END_MARKER, MAX_STEPS, PROCEED_MESSAGE, SENTINEL_FILE};
use crate::core::directive::TOOL_CALL_MARKER;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Render the system prompt describing the directive syntax for `os`.
pub fn render_system_prompt(os: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)?;
    let rendered = env.get_template("system")?.render(context! {
        os => os,
        tool_call_marker => TOOL_CALL_MARKER,
        sentinel => SENTINEL_FILE,
        proceed => PROCEED_MESSAGE,
        end_marker => END_MARKER,
        max_steps => MAX_STEPS,
    })?;
    Ok(rendered)
}

/// System prompt for the host this binary runs on.
pub fn default_system_prompt() -> Result<String> {
    render_system_prompt(std::env::consts::OS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directive::DirectiveKind;

    #[test]
    fn mentions_host_and_every_tag() {
        let prompt = render_system_prompt("linux").expect("render");
        assert!(prompt.starts_with("This conversation is running inside a terminal session on linux."));
        for kind in DirectiveKind::ALL {
            assert!(prompt.contains(kind.open_tag()), "missing {}", kind.open_tag());
        }
        assert!(prompt.contains("[TOOL_CALL] <RUN>"));
        assert!(prompt.contains("AGENTSTEPS.arisu"));
        assert!(prompt.contains("At most 10 steps"));
    }
}
