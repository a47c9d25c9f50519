//! Prompt and instruction templates
//!
//! Templates use `{name}` placeholders filled in by [`render`].

/// Frames who is speaking to whom.
pub const DIALOGUE_RULES: &str = "You are {speaker_name}, in a conversation with {listener_name}. \
Reply only as {speaker_name} and never write lines for {listener_name}.";

/// Date, time, and surroundings.
pub const CONTEXTUAL_INFORMATION: &str = "Current date and time: {date_time}\nWeather: {weather}\n";

/// Instructions for a normal dialogue turn.
pub const DIALOGUE_INSTRUCTIONS: &str = include_str!("dialogue_instructions.md");

/// Instructions for the mood-update query.
pub const UPDATE_MOOD_INSTRUCTIONS: &str = include_str!("update_mood.md");

/// Grammar the service must follow inside a mood block.
pub const MOOD_RULES: &str = include_str!("mood_rules.md");

/// Prompt asking the bot to open the conversation.
pub const GREETING_PROMPT: &str = "{speaker_name} opens the conversation with a greeting.\n{speaker_name}: ";

/// Prompt asking the bot for its next turn.
pub const RESPONSE_PROMPT: &str = "{speaker_name}: ";

/// Prompt asking for a mood update.
pub const UPDATE_MOOD_PROMPT: &str = "The current mood stats of {agent_name} are {{stats}}. \
Update them to reflect the conversation so far.";

/// Trailer that introduces the transcript appended to instructions.
pub const CONVERSATION_SO_FAR: &str = "\nThe conversation so far:\n";

/// Fill `{key}` placeholders in one pass. Unknown placeholders are left
/// untouched and substituted values are never scanned again.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let found = after.find('}').and_then(|end| {
            let key = &after[..end];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, end))
        });
        match found {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
