//! The per-candidate evaluation record and its on-disk text form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::CandidateId;
use crate::gate::{GateChain, TerminalState};

/// Final result of evaluating one candidate. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub id: CandidateId,
    pub reward: f64,
    pub state: TerminalState,
    pub chain: GateChain,
    /// First-occurrence order, de-duplicated.
    pub matched_apis: Vec<String>,
    pub prompt: String,
    /// Hex SHA-256 of the evaluated source; empty when no source was found.
    pub source_digest: String,
    pub evaluated_at: DateTime<Utc>,
}

impl RewardRecord {
    /// Diagnostic of the failing gate, or empty on success.
    pub fn diagnostic(&self) -> &str {
        self.chain.diagnostic()
    }

    /// Render the text log:
    ///
    /// ```text
    /// reward: <float>
    /// error:
    /// <diagnostic, newlines flattened>
    /// APIs: ['a', 'b']
    /// prompt:
    /// <raw prompt>
    /// ```
    pub fn render_log(&self) -> String {
        format!(
            "reward: {:?}\nerror:\n{}\nAPIs: {}\nprompt:\n{}",
            self.reward,
            flatten_newlines(self.diagnostic()),
            render_list_literal(&self.matched_apis),
            self.prompt
        )
    }
}

/// A text log read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub reward: f64,
    pub error: String,
    pub apis: Vec<String>,
    pub prompt: String,
}

impl LogEntry {
    /// Parse a rendered log. Returns a reason on malformed input.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut lines = text.splitn(6, '\n');

        let reward_line = lines.next().unwrap_or_default();
        let reward = reward_line
            .strip_prefix("reward:")
            .ok_or_else(|| "missing `reward:` line".to_string())?
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("bad reward value: {e}"))?;

        if lines.next() != Some("error:") {
            return Err("missing `error:` line".to_string());
        }
        let error = lines.next().unwrap_or_default().to_string();

        let apis = lines
            .next()
            .and_then(|l| l.strip_prefix("APIs:"))
            .ok_or_else(|| "missing `APIs:` line".to_string())
            .and_then(|l| parse_list_literal(l.trim()))?;

        let prompt = match lines.next() {
            Some("prompt:") => lines.next().unwrap_or_default().to_string(),
            None | Some("") => String::new(),
            Some(_) => return Err("missing `prompt:` line".to_string()),
        };

        Ok(Self {
            reward,
            error,
            apis,
            prompt,
        })
    }
}

/// Replace line breaks with a literal `\n` so the diagnostic fits on one line.
pub fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", "\\n").replace('\n', "\\n")
}

/// `['a', 'b']` with `\` and `'` escaped.
pub fn render_list_literal(items: &[String]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|s| format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

fn parse_list_literal(text: &str) -> Result<Vec<String>, String> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("not a list literal: {text}"))?;

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        let Some(quote) = chars.next() else {
            break;
        };
        if quote != '\'' && quote != '"' {
            return Err(format!("unquoted list item in {text}"));
        }
        let mut item = String::new();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some(c) => item.push(c),
                    None => return Err("dangling escape".to_string()),
                },
                Some(c) if c == quote => break,
                Some(c) => item.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
        items.push(item);
    }
    Ok(items)
}
