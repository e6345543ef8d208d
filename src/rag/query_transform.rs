//! Query rewriting: decontextualization, RAG-Fusion variants and retry reformulation

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use tracing::warn;

use crate::clients::GenerationClient;
use crate::llm::ChatMessage;
use crate::llm::GenerationParams;
use crate::llm::RagPrompts;
use crate::models::HistoryTurn;
use crate::models::Role;

/// Turns of history included in a rewrite prompt
const HISTORY_WINDOW: usize = 6;

/// Upper bound on Fusion variants regardless of configuration
pub const MAX_VARIANTS: usize = 3;

static RE_SFS_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:SFS\s*)?(1[89]\d{2}|20\d{2}):(\d{1,4})\b").ok());

static RE_LAW_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([a-zåäö]+(?:lagen|balken|förordningen)|GDPR|dataskyddsförordningen|LAS|OSL|LOU|MBL)\b",
    )
    .ok()
});

const ANAPHORIC_WORDS: &[&str] = &[
    "den", "det", "denna", "detta", "dessa", "där", "dess", "deras", "dom", "it", "its", "that",
    "this", "they", "them", "those", "there",
];

const CONTINUATION_PREFIXES: &[&str] = &["och ", "men ", "och om", "vad gäller", "and ", "what about"];

const STOPWORDS: &[&str] = &[
    "och", "att", "det", "som", "för", "med", "den", "har", "inte", "till", "vad", "vilka",
    "vilken", "vilket", "hur", "när", "var", "kan", "ska", "skall", "får", "från", "enligt",
    "eller", "om", "på", "av", "är", "en", "ett", "jag", "du", "vi", "de", "min", "mitt", "mina",
    "gäller", "finns", "måste", "mig", "sig", "sin", "sitt", "sina", "alla", "något", "några",
    "detta", "dessa", "denna", "där", "här", "också", "bara", "vara", "blir", "the", "and", "what",
    "which", "does", "for", "with", "how", "are", "is", "of", "to", "in",
];

/// Lowercased content words of a text, stopwords and short tokens removed
pub fn content_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric() && c != ':')
        .map(|t| t.trim_matches(':').to_lowercase())
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Keyword form of a question: its content words in order
pub fn keyword_form(question: &str) -> String {
    content_terms(question).join(" ")
}

/// True when the question leans on earlier turns (pronouns, ellipsis)
pub fn needs_decontextualization(question: &str) -> bool {
    let lowered = question.trim().to_lowercase();
    if CONTINUATION_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return true;
    }
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| ANAPHORIC_WORDS.contains(&word))
}

/// Statute reference (SFS number or law name) mentioned in a text
pub fn extract_subject(text: &str) -> Option<String> {
    if let Some(m) = RE_SFS_NUMBER.as_ref().and_then(|re| re.captures(text)) {
        return Some(format!("SFS {}:{}", &m[1], &m[2]));
    }
    RE_LAW_NAME
        .as_ref()
        .and_then(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

/// Strip list markers and quotes the model tends to add around a single line
fn clean_line(line: &str) -> String {
    line.trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | '•'))
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}

fn format_history(history: &[HistoryTurn]) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    history[start..]
        .iter()
        .map(|turn| {
            let who = match turn.role {
                Role::User => "Användare",
                Role::Assistant => "Assistent",
            };
            format!("{who}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Query rewriting on the generation backend with local fallbacks
pub struct QueryTransformer {
    generation: Arc<dyn GenerationClient>,
    params: GenerationParams,
}

impl QueryTransformer {
    pub fn new(generation: Arc<dyn GenerationClient>) -> Self {
        Self {
            generation,
            params: GenerationParams::new(0.0, 200),
        }
    }

    /// Make a follow-up question self-contained.
    ///
    /// Without history or anaphoric markers the question is returned as is. A
    /// statute named in the last user turn is appended textually; otherwise
    /// the model rewrites the question, falling back to the original on error.
    pub async fn decontextualize(&self, question: &str, history: &[HistoryTurn]) -> String {
        if history.is_empty() || !needs_decontextualization(question) {
            return question.to_string();
        }

        let last_user_subject = history
            .iter()
            .rev()
            .filter(|t| t.role == Role::User)
            .find_map(|t| extract_subject(&t.content));
        if let Some(subject) = last_user_subject {
            if !question.to_lowercase().contains(&subject.to_lowercase()) {
                let rewritten = format!("{} (angående {subject})", question.trim());
                debug!("Decontextualized by subject: {}", rewritten);
                return rewritten;
            }
        }

        let prompt = RagPrompts::decontextualize().render_with(&[
            ("history", &format_history(history)),
            ("question", question),
        ]);
        match self
            .generation
            .complete(&[ChatMessage::user(prompt)], &self.params)
            .await
        {
            Ok(reply) => {
                let rewritten = clean_line(reply.lines().next().unwrap_or_default());
                if rewritten.is_empty() {
                    question.to_string()
                } else {
                    debug!("Decontextualized by model: {}", rewritten);
                    rewritten
                }
            }
            Err(e) => {
                warn!("Decontextualization failed, using original question: {}", e);
                question.to_string()
            }
        }
    }

    /// The original question followed by up to `n` distinct variants
    pub async fn generate_variants(&self, question: &str, n: usize) -> Vec<String> {
        let n = n.min(MAX_VARIANTS);
        let mut queries = vec![question.to_string()];
        if n == 0 {
            return queries;
        }

        let mut seen: HashSet<String> = HashSet::from([question.trim().to_lowercase()]);
        let prompt = RagPrompts::query_variants()
            .render_with(&[("count", &n.to_string()), ("question", question)]);

        match self
            .generation
            .complete(&[ChatMessage::user(prompt)], &self.params)
            .await
        {
            Ok(reply) => {
                for line in reply.lines().map(clean_line) {
                    if queries.len() > n {
                        break;
                    }
                    if !line.is_empty() && seen.insert(line.to_lowercase()) {
                        queries.push(line);
                    }
                }
            }
            Err(e) => warn!("Variant generation failed, using keyword form: {}", e),
        }

        if queries.len() == 1 {
            let keywords = keyword_form(question);
            if !keywords.is_empty() && seen.insert(keywords.clone()) {
                queries.push(keywords);
            }
        }
        queries
    }

    /// Broader search query after a round whose documents were all irrelevant
    pub async fn transform_for_retry(&self, question: &str, previous: &str, attempt: u32) -> String {
        let prompt = RagPrompts::transform_query()
            .render_with(&[("question", question), ("previous", previous)]);
        let rewritten = match self
            .generation
            .complete(&[ChatMessage::user(prompt)], &self.params)
            .await
        {
            Ok(reply) => clean_line(reply.lines().next().unwrap_or_default()),
            Err(e) => {
                warn!("Query transformation failed on attempt {}: {}", attempt, e);
                String::new()
            }
        };

        if rewritten.is_empty() || rewritten.eq_ignore_ascii_case(previous) {
            let keywords = keyword_form(question);
            if keywords.is_empty() {
                question.to_string()
            } else {
                keywords
            }
        } else {
            rewritten
        }
    }
}
