//! Answer prompts per response mode and the canonical refusal

use crate::llm::ChatMessage;
use crate::llm::RagPrompts;
use crate::models::HistoryTurn;
use crate::models::ResponseMode;
use crate::models::Role;

/// Returned whenever the evidence does not support an answer
pub const REFUSAL_TEXT: &str =
    "Jag hittar inte tillräckligt underlag i de tillgängliga källorna för att besvara frågan.";

/// Prior turns forwarded to the answer model
const HISTORY_TURNS: usize = 6;

/// Whether a text is the canonical refusal, tolerating whitespace and quotes
pub fn is_refusal(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim();
    normalized == REFUSAL_TEXT || normalized.trim_end_matches('.') == REFUSAL_TEXT.trim_end_matches('.')
}

/// Build the message list for a grounded answer (Evidence or Assist)
pub fn build_answer_messages(
    mode: ResponseMode,
    question: &str,
    history: &[HistoryTurn],
    context: &str,
    feedback: Option<&str>,
) -> Vec<ChatMessage> {
    let system = match mode {
        ResponseMode::Evidence => RagPrompts::evidence_system()
            .render_with(&[("refusal", REFUSAL_TEXT), ("context", context)]),
        ResponseMode::Assist => RagPrompts::assist_system().render_with(&[("context", context)]),
        ResponseMode::Chat => RagPrompts::chat_system().render_with(&[]),
    };

    let mut messages = vec![ChatMessage::system(system)];
    append_history(&mut messages, history);

    let mut user = question.to_string();
    if mode == ResponseMode::Evidence {
        user.push_str(
            "\n\nSvara som JSON: {\"answer\": \"svar med [n]-hänvisningar\", \"citations\": [\"n\", ...], \"confidence\": 0.0-1.0}",
        );
    }
    if let Some(feedback) = feedback {
        user.push_str(&format!(
            "\n\nDitt förra utkast underkändes av granskningen. Åtgärda följande:\n{feedback}"
        ));
    }
    messages.push(ChatMessage::user(user));
    messages
}

/// Build the message list for a conversational turn without sources
pub fn build_chat_messages(question: &str, history: &[HistoryTurn]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(
        RagPrompts::chat_system().render_with(&[]),
    )];
    append_history(&mut messages, history);
    messages.push(ChatMessage::user(question));
    messages
}

fn append_history(messages: &mut Vec<ChatMessage>, history: &[HistoryTurn]) {
    let start = history.len().saturating_sub(HISTORY_TURNS);
    for turn in &history[start..] {
        messages.push(match turn.role {
            Role::User => ChatMessage::user(turn.content.clone()),
            Role::Assistant => ChatMessage::assistant(turn.content.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_refusal() {
        assert!(is_refusal(REFUSAL_TEXT));
        assert!(is_refusal(&format!("  \"{REFUSAL_TEXT}\"\n")));
        assert!(is_refusal(REFUSAL_TEXT.trim_end_matches('.')));
        assert!(!is_refusal("Enligt 3 § gäller följande [1]."));
    }

    #[test]
    fn test_evidence_messages_embed_context_and_refusal() {
        let messages = build_answer_messages(
            ResponseMode::Evidence,
            "Vad gäller?",
            &[HistoryTurn::user("Hej"), HistoryTurn::assistant("Hej!")],
            "[1] Lag\ntext",
            None,
        );
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains(REFUSAL_TEXT));
        assert!(messages[0].content.contains("[1] Lag"));
        assert!(messages[3].content.starts_with("Vad gäller?"));
        assert!(messages[3].content.contains("JSON"));
    }

    #[test]
    fn test_feedback_is_appended_for_revisions() {
        let messages = build_answer_messages(
            ResponseMode::Assist,
            "Fråga",
            &[],
            "ctx",
            Some("Lägg till hänvisningar"),
        );
        let last = &messages.last().unwrap().content;
        assert!(last.contains("Lägg till hänvisningar"));
        assert!(!last.contains("JSON"));
    }

    #[test]
    fn test_history_is_windowed() {
        let history: Vec<HistoryTurn> = (0..10).map(|i| HistoryTurn::user(format!("t{i}"))).collect();
        let messages = build_chat_messages("nu", &history);
        assert_eq!(messages.len(), 1 + HISTORY_TURNS + 1);
        assert_eq!(messages[1].content, "t4");
    }
}
