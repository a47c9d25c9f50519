//! Mood updates proposed by the inference service.
//!
//! The service is asked to answer with a fenced block tagged [`MOOD_FENCE`]
//! whose body is a list of statements such as `happy += 0.5`. The block is
//! parsed with a small fixed grammar and applied to an [`Agent`]; nothing in
//! it is ever executed.
//!
//! Grammar, one statement per line:
//!
//! ```text
//! statement := target op number
//! target    := ident | [agent.]mood_stats["ident"]
//! op        := "+=" | "-=" | "="
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A block is applied
//! entirely or not at all.

use crate::agent::Agent;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Language tag of the fenced block carrying a mood update.
pub const MOOD_FENCE: &str = "mood";

static STATEMENT_REGEX: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:(?:agent\.)?mood_stats\[\s*["']([A-Za-z_][A-Za-z0-9_]*)["']\s*\]|([A-Za-z_][A-Za-z0-9_]*))\s*(\+=|-=|=)\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)$"#,
    )
});

/// Find the first fenced block tagged `language` and return its body.
///
/// The match is non-greedy, so the body ends at the first closing fence.
pub fn find_code_block<'a>(language: &str, text: &'a str) -> Option<&'a str> {
    let pattern = format!(r"(?s)```{}\r?\n(.*?)\r?\n```", regex::escape(language));
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str())
}

/// Find the first ```` ```json ```` block.
pub fn find_json(text: &str) -> Option<&str> {
    find_code_block("json", text)
}

/// Find the first mood block.
pub fn find_mood_block(text: &str) -> Option<&str> {
    find_code_block(MOOD_FENCE, text)
}

/// How a statement changes a stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoodOp {
    Add,
    Subtract,
    Set,
}

/// One parsed line of a mood block.
#[derive(Debug, Clone, PartialEq)]
pub struct MoodStatement {
    pub stat: String,
    pub op: MoodOp,
    pub value: f64,
}

/// A parsed mood block, ready to apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoodUpdate {
    statements: Vec<MoodStatement>,
}

impl MoodUpdate {
    /// Parse a block body. Any line outside the grammar rejects the block.
    pub fn parse(block: &str) -> Result<Self, MoodError> {
        let regex = STATEMENT_REGEX
            .as_ref()
            .map_err(|e| MoodError::Pattern(e.clone()))?;
        let mut statements = Vec::new();

        for (index, raw) in block.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let syntax_error = || MoodError::Syntax {
                line: index + 1,
                text: line.to_string(),
            };
            let captures = regex.captures(line).ok_or_else(syntax_error)?;

            let stat = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str().to_string())
                .ok_or_else(syntax_error)?;
            let op = match captures.get(3).map(|m| m.as_str()) {
                Some("+=") => MoodOp::Add,
                Some("-=") => MoodOp::Subtract,
                Some("=") => MoodOp::Set,
                _ => return Err(syntax_error()),
            };
            let value = captures
                .get(4)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .ok_or_else(syntax_error)?;
            if !value.is_finite() {
                return Err(MoodError::NonFinite(stat));
            }

            statements.push(MoodStatement { stat, op, value });
        }

        Ok(Self { statements })
    }

    pub fn statements(&self) -> &[MoodStatement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Apply every statement to `agent`, or none of them on error.
    ///
    /// `=` may introduce a new stat; `+=` and `-=` require it to exist.
    pub fn apply(&self, agent: &mut Agent) -> Result<(), MoodError> {
        let mut stats = agent.mood_stats().clone();

        for statement in &self.statements {
            let next = match statement.op {
                MoodOp::Set => statement.value,
                MoodOp::Add | MoodOp::Subtract => {
                    let current = stats
                        .get(&statement.stat)
                        .copied()
                        .ok_or_else(|| MoodError::UnknownStat(statement.stat.clone()))?;
                    if statement.op == MoodOp::Add {
                        current + statement.value
                    } else {
                        current - statement.value
                    }
                }
            };
            if !next.is_finite() {
                return Err(MoodError::NonFinite(statement.stat.clone()));
            }
            stats.insert(statement.stat.clone(), next);
        }

        agent.replace_mood_stats(stats);
        Ok(())
    }
}

/// Result of applying a reply to an agent.
#[derive(Debug)]
pub enum MoodOutcome {
    /// The block was applied; carries the number of statements.
    Applied(usize),
    /// The reply had no mood block. The agent is unchanged.
    NoBlock,
    /// The block was malformed. The agent is unchanged.
    Rejected(MoodError),
}

/// Extract the mood block from `reply` and apply it to `agent`.
pub fn apply_reply(agent: &mut Agent, reply: &str) -> MoodOutcome {
    let Some(block) = find_mood_block(reply) else {
        debug!("No mood block in reply; {} unchanged", agent.name());
        return MoodOutcome::NoBlock;
    };

    match MoodUpdate::parse(block).and_then(|update| {
        update.apply(agent)?;
        Ok(update.statements().len())
    }) {
        Ok(count) => {
            info!("Applied {} mood statements to {}", count, agent.name());
            MoodOutcome::Applied(count)
        }
        Err(e) => {
            warn!("Rejected mood update for {}: {}", agent.name(), e);
            MoodOutcome::Rejected(e)
        }
    }
}

/// Mood block errors
#[derive(Debug, Error, PartialEq)]
pub enum MoodError {
    #[error("invalid mood statement on line {line}: {text}")]
    Syntax { line: usize, text: String },
    #[error("unknown mood stat: {0}")]
    UnknownStat(String),
    #[error("mood stat {0} would not be a finite number")]
    NonFinite(String),
    #[error("mood statement pattern failed to compile: {0}")]
    Pattern(regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MoodStats;

    fn agent() -> Agent {
        Agent::with_stats(
            "Bot",
            MoodStats::from([("happy".to_string(), 1.0), ("sad".to_string(), 2.0)]),
        )
    }

    #[test]
    fn test_find_code_block_returns_body_only() {
        let reply = "Sure!\n```mood\nhappy += 1\nsad -= 0.5\n```\nDone.";
        assert_eq!(find_mood_block(reply), Some("happy += 1\nsad -= 0.5"));
    }

    #[test]
    fn test_find_code_block_is_non_greedy() {
        let reply = "```mood\nhappy = 1\n```\ntext\n```mood\nsad = 9\n```";
        assert_eq!(find_mood_block(reply), Some("happy = 1"));
    }

    #[test]
    fn test_find_code_block_other_language() {
        let reply = "```mood\nhappy = 1\n```";
        assert_eq!(find_json(reply), None);
        assert_eq!(find_json("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_find_code_block_escapes_language() {
        assert_eq!(find_code_block("c++", "```c++\nint x;\n```"), Some("int x;"));
        assert_eq!(find_code_block("c++", "```cc\nint x;\n```"), None);
    }

    #[test]
    fn test_parse_statements() {
        let update = MoodUpdate::parse(
            "# comment\nhappy += 0.5\n\n  sad -= 2  \nagent.mood_stats[\"bored\"] = -1e1\n",
        )
        .unwrap();
        assert_eq!(
            update.statements(),
            &[
                MoodStatement {
                    stat: "happy".to_string(),
                    op: MoodOp::Add,
                    value: 0.5
                },
                MoodStatement {
                    stat: "sad".to_string(),
                    op: MoodOp::Subtract,
                    value: 2.0
                },
                MoodStatement {
                    stat: "bored".to_string(),
                    op: MoodOp::Set,
                    value: -10.0
                },
            ]
        );
    }

    #[test]
    fn test_statement_pattern_compiles() {
        assert!(STATEMENT_REGEX.is_ok());
        assert!(MoodUpdate::parse("").unwrap().statements().is_empty());
        assert!(MoodUpdate::parse("# nothing to do").unwrap().statements().is_empty());
    }

    #[test]
    fn test_parse_rejects_code() {
        let err = MoodUpdate::parse("happy += 1\nimport os").unwrap_err();
        assert_eq!(
            err,
            MoodError::Syntax {
                line: 2,
                text: "import os".to_string()
            }
        );
        assert!(MoodUpdate::parse("happy += len(x)").is_err());
        assert!(MoodUpdate::parse("happy += 1; sad = 0").is_err());
    }

    #[test]
    fn test_apply_updates_stats() {
        let mut bot = agent();
        MoodUpdate::parse("happy += 0.5\nsad = 0\nexcited = 3")
            .unwrap()
            .apply(&mut bot)
            .unwrap();
        assert_eq!(bot.stat("happy"), Some(1.5));
        assert_eq!(bot.stat("sad"), Some(0.0));
        assert_eq!(bot.stat("excited"), Some(3.0));
    }

    #[test]
    fn test_apply_is_atomic() {
        let mut bot = agent();
        let before = bot.clone();
        let err = MoodUpdate::parse("happy += 5\ngrumpy += 1")
            .unwrap()
            .apply(&mut bot)
            .unwrap_err();
        assert_eq!(err, MoodError::UnknownStat("grumpy".to_string()));
        assert_eq!(bot, before);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let mut bot = agent();
        let before = bot.clone();
        assert!(matches!(
            MoodUpdate::parse("happy = 1e400"),
            Err(MoodError::NonFinite(_))
        ));

        let update = MoodUpdate::parse("happy = 1e308\nhappy += 1e308").unwrap();
        assert!(matches!(update.apply(&mut bot), Err(MoodError::NonFinite(_))));
        assert_eq!(bot, before);
    }

    #[test]
    fn test_apply_reply_outcomes() {
        let mut bot = agent();
        let before = bot.clone();

        assert!(matches!(
            apply_reply(&mut bot, "I feel fine."),
            MoodOutcome::NoBlock
        ));
        assert_eq!(bot, before);

        assert!(matches!(
            apply_reply(&mut bot, "```mood\nexec('rm -rf /')\n```"),
            MoodOutcome::Rejected(MoodError::Syntax { .. })
        ));
        assert_eq!(bot, before);

        assert!(matches!(
            apply_reply(&mut bot, "ok\n```mood\nhappy -= 1\n```"),
            MoodOutcome::Applied(1)
        ));
        assert_eq!(bot.stat("happy"), Some(0.0));
    }
}
