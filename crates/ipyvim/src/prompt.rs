//! Prompt templates and the editor highlight rules derived from them.

use crate::config::{Config, PromptColor};

/// Expand a `%`-style prompt template.
///
/// `%(line)d` and `%(line)s` become `line`, `%%` becomes `%`. Anything else
/// is copied through unchanged.
pub fn format_prompt(template: &str, line: usize) -> String {
    let mut out = String::with_capacity(template.len() + 4);
    let mut rest = template;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if let Some(after) = tail
            .strip_prefix("%(line)d")
            .or_else(|| tail.strip_prefix("%(line)s"))
        {
            out.push_str(&line.to_string());
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%%") {
            out.push('%');
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// A dot leader as wide as `prompt`, keeping the prompt's trailing whitespace.
///
/// `"In [42]: "` becomes `"........ "`.
pub fn continuation_prompt(prompt: &str) -> String {
    let trimmed = prompt.trim_end();
    let mut dots = ".".repeat(trimmed.chars().count());
    dots.push_str(&prompt[trimmed.len()..]);
    dots
}

/// Prompt numbering state carried across renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptState {
    /// Execution count of the most recent input or result seen
    pub execution_count: usize,
    pub show_execution_count: bool,
}

impl PromptState {
    pub fn new(show_execution_count: bool) -> Self {
        Self {
            execution_count: 0,
            show_execution_count,
        }
    }

    /// The status-line echo after sending `code`.
    pub fn echo_for(&self, code: &str, count: Option<usize>) -> String {
        match count {
            Some(n) if self.show_execution_count => format!("In[{}]: {}", n, code),
            _ => format!("In[]: {}", code),
        }
    }
}

/// Escape characters that are special in editor (Vim) patterns.
pub fn vim_regex_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '[' | ']' | ':' | '.' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A pattern matching any expansion of `template` at the start of a line.
fn prompt_pattern(template: &str) -> String {
    let sample = format_prompt(template, 999);
    vim_regex_escape(&sample).replace("999", "[ 0-9]*")
}

fn highlight(group: &str, color: &PromptColor) -> String {
    format!(
        "hi {} ctermfg={} guifg={}",
        group, color.console, color.gui
    )
}

/// Editor commands that colour the three prompt categories in the log.
pub fn highlight_commands(config: &Config) -> Vec<String> {
    let colors = &config.prompt_colors;
    vec![
        highlight("IPyPromptIn", &colors.input),
        highlight("IPyPromptOut", &colors.output),
        highlight("IPyPromptOut2", &colors.continuation),
        format!(
            "syn match IPyPromptIn /^{}/",
            prompt_pattern(&config.status_prompt_in)
        ),
        format!(
            "syn match IPyPromptOut /^{}/",
            prompt_pattern(&config.status_prompt_out)
        ),
        "syn match IPyPromptOut2 /^\\.\\.\\.* /".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates() {
        assert_eq!(format_prompt("In [%(line)d]: ", 42), "In [42]: ");
        assert_eq!(format_prompt("Out[%(line)d]: ", 3), "Out[3]: ");
    }

    #[test]
    fn test_template_escapes() {
        assert_eq!(format_prompt("%(line)s%% ", 7), "7% ");
        assert_eq!(format_prompt("100% [%(line)d]", 1), "100% [1]");
        assert_eq!(format_prompt(">>> ", 9), ">>> ");
    }

    #[test]
    fn test_continuation_has_prompt_width() {
        let prompt = format_prompt("In [%(line)d]: ", 42);
        let dots = continuation_prompt(&prompt);
        assert_eq!(dots, "........ ");
        assert_eq!(dots.chars().count(), prompt.chars().count());
    }

    #[test]
    fn test_echo_for() {
        let state = PromptState::new(true);
        assert_eq!(state.echo_for("a = 1", Some(4)), "In[4]: a = 1");
        assert_eq!(state.echo_for("a = 1", None), "In[]: a = 1");
        let state = PromptState::new(false);
        assert_eq!(state.echo_for("a = 1", Some(4)), "In[]: a = 1");
    }

    #[test]
    fn test_highlight_commands() {
        let commands = highlight_commands(&Config::default());
        assert_eq!(commands[0], "hi IPyPromptIn ctermfg=Green guifg=Green");
        assert_eq!(commands[3], "syn match IPyPromptIn /^In \\[[ 0-9]*\\]\\: /");
        assert_eq!(commands[4], "syn match IPyPromptOut /^Out\\[[ 0-9]*\\]\\: /");
        assert_eq!(commands[5], "syn match IPyPromptOut2 /^\\.\\.\\.* /");
    }
}
