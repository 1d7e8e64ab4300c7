use whatson_schema::{present, ConversationTurn, EventRecord, Role};

use crate::dates;
use crate::recover;

/// Generation system prompt. `{assistant_name}` and `{events_context}` are
/// interpolated at build time.
const SYSTEM_PROMPT: &str = "\
You are {assistant_name}, a friendly and helpful assistant who can chat about events when asked. {assistant_name} is an AI assistant designed to help users discover events and what's happening around town.
Your goal is to have natural, conversational interactions - be friendly, helpful, and conversational.

Context:
{events_context}

IMPORTANT RULES:
1. **Be Conversational First**: Chat naturally like a friend. Don't force events into every response.
2. **Only Mention Events When Asked**: If the user is just chatting (greetings, general questions, casual conversation), respond conversationally WITHOUT mentioning events or showing event lists.
3. **When Events Are Relevant**: Only when the user explicitly asks about events, search, or wants recommendations, then use the event context provided.
4. **No Event Lists in General Chat**: If the context shows \"No events found\" or the user is just having a conversation, don't mention events at all. Just chat naturally.
5. **Be Natural**: Respond like a friendly assistant - don't be robotic or overly enthusiastic about events when not relevant.

Style Guidelines:
- **Be Conversational**: Talk naturally, like you're chatting with a friend. Don't use robotic lists.
- **Be Friendly**: Use natural language and be helpful, but don't force events into every response.
- **Smart Context Use**: Only use event information when the user is actually asking about events.
- **Emojis**: Use emojis sparingly and naturally (😊 👋 🎉), not in every message.
- **Maintain Context**: Pay attention to the previous conversation and respond appropriately.

Instructions:
1. If the user is just chatting (greetings, general questions, casual talk), respond conversationally WITHOUT mentioning events.
2. Only use event information when the user explicitly asks about events, searches, or wants recommendations.
3. If the context shows \"No events found\" and the user is just chatting, respond naturally without mentioning events.
4. If the user asks a follow-up question about an event already discussed, answer specifically about that event.
5. Be concise and natural - don't list events unless the user explicitly asks for them.
6. **IMPORTANT - Always Include Dates**: When mentioning events, ALWAYS include the numerical date (e.g., \"February 7th\", \"7th & 8th February\"). Make sure the date is clearly visible in your response.
7. Remember: You're a friendly assistant first, event helper second. Chat naturally!
";

/// Marker used when no candidates survived retrieval; the rules above tell
/// the model to treat the turn as general conversation.
pub const EMPTY_CONTEXT: &str =
    "No events found in the database. The user is likely just having a general conversation.";

fn value_or_na(value: &str) -> &str {
    present(value).unwrap_or("N/A")
}

/// Render the candidate set as the grounding block interpolated into the
/// system prompt. Dates and locations go through the noise recovery passes
/// so the model sees the best version of each field.
pub fn format_events_context(events: &[EventRecord]) -> String {
    if events.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    events
        .iter()
        .enumerate()
        .map(|(index, event)| {
            let date = dates::clean_date_string(&event.date_raw, Some(event));
            let formatted_date = match present(&date) {
                Some(date) => format!("📅 {date}"),
                None => "N/A".to_string(),
            };
            let location = recover::recover_location(&event.location, Some(event));
            let highlights = if event.highlights.is_empty() {
                "N/A".to_string()
            } else {
                event.highlights.join(", ")
            };
            let ocr = event.ocr_text();
            let ocr_excerpt: String = ocr.chars().take(300).collect();

            format!(
                "Event {n}:\n\
                 - Name: {name}\n\
                 - Organizer: {organizer}\n\
                 - Date: {formatted_date} (Numerical date: {date_value})\n\
                 - Time: {time}\n\
                 - Location: {location}\n\
                 - Entry Type: {entry}\n\
                 - Website: {website}\n\
                 - Highlights: {highlights}\n\
                 - Additional Info: {ocr}",
                n = index + 1,
                name = value_or_na(&event.name),
                organizer = value_or_na(&event.organizer),
                date_value = value_or_na(&date),
                time = value_or_na(&event.time),
                location = value_or_na(&location),
                entry = value_or_na(&event.entry_type),
                website = value_or_na(&event.website),
                ocr = value_or_na(&ocr_excerpt),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the full system prompt: template, grounding context, the last
/// ten turns of conversation, and the user's name when known.
pub fn build_system_prompt(
    assistant_name: &str,
    events: &[EventRecord],
    history: &[ConversationTurn],
    user_name: Option<&str>,
) -> String {
    let mut prompt = SYSTEM_PROMPT
        .replace("{assistant_name}", assistant_name)
        .replace("{events_context}", &format_events_context(events));

    if !history.is_empty() {
        let start = history.len().saturating_sub(10);
        let lines: Vec<String> = history[start..]
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "User",
                    Role::Assistant => assistant_name,
                };
                format!("{role}: {}", turn.content)
            })
            .collect();
        prompt.push_str("\n\n=== Previous Conversation ===\n");
        prompt.push_str(&lines.join("\n"));
        prompt.push_str("\n=== End of Previous Conversation ===\n");
    }

    if let Some(name) = user_name {
        prompt.push_str(&format!(
            "\nNote: The user's name is {name}. You can use their name to personalize responses when appropriate.\n"
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_candidates_use_general_conversation_marker() {
        assert_eq!(format_events_context(&[]), EMPTY_CONTEXT);
    }

    #[test]
    fn context_block_carries_recovered_fields() {
        let mut event = EventRecord::new("1", "Weekend Bazaar");
        event.date_raw = "7th & 8th February".into();
        event.location = "NE".into();
        event.full_text = "Grand sale happening at Ashoka One Mall".into();
        event.highlights = vec!["flea market".into(), "live music".into()];
        event.raw_ocr = vec!["WEEKEND BAZAAR".into(), "gates open 11 AM".into()];

        let context = format_events_context(&[event]);
        assert!(context.starts_with("Event 1:"));
        assert!(context.contains("- Name: Weekend Bazaar"));
        assert!(context.contains("- Date: 📅 7th & 8th February (Numerical date: 7th & 8th February)"));
        assert!(context.contains("- Location: Ashoka mall"));
        assert!(context.contains("- Highlights: flea market, live music"));
        assert!(context.contains("- Additional Info: WEEKEND BAZAAR gates open 11 AM"));
        assert!(context.contains("- Organizer: N/A"));
    }

    #[test]
    fn ocr_excerpt_is_bounded() {
        let mut event = EventRecord::new("1", "Long Poster");
        event.raw_ocr = vec!["x".repeat(500)];
        let context = format_events_context(&[event]);
        let info_line = context
            .lines()
            .find(|l| l.starts_with("- Additional Info:"))
            .unwrap();
        assert!(info_line.len() < 330);
    }

    #[test]
    fn system_prompt_includes_history_and_name() {
        let history = vec![
            ConversationTurn::user("hi"),
            ConversationTurn::assistant("Hey there! 👋"),
        ];
        let prompt = build_system_prompt("Whatson", &[], &history, Some("Ravi"));
        assert!(prompt.contains("You are Whatson"));
        assert!(prompt.contains(EMPTY_CONTEXT));
        assert!(prompt.contains("=== Previous Conversation ===\nUser: hi\nWhatson: Hey there! 👋"));
        assert!(prompt.contains("The user's name is Ravi"));
    }

    #[test]
    fn history_window_is_last_ten_turns() {
        let history: Vec<ConversationTurn> =
            (0..14).map(|i| ConversationTurn::user(format!("m{i}"))).collect();
        let prompt = build_system_prompt("Whatson", &[], &history, None);
        assert!(!prompt.contains("User: m3\n"));
        assert!(prompt.contains("User: m4\n"));
        assert!(prompt.contains("User: m13"));
    }
}
