//! Draft critique: deterministic citation checks followed by an LLM policy review

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use super::context::ContextAssembler;
use super::prompts::is_refusal;
use crate::clients::GenerationClient;
use crate::llm::complete_structured;
use crate::llm::ChatMessage;
use crate::llm::GenerationParams;
use crate::llm::RagPrompts;
use crate::models::ResponseMode;
use crate::models::ScoredResult;

static RE_CITATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*[,;]\s*\d+)*)\]").ok());

/// Declarative sentences with at least this many words are factual claims
const MIN_CLAIM_WORDS: usize = 2;

const CRITIQUE_UNAVAILABLE: &str = "Granskningen kunde inte genomföras. Kontrollera att varje påstående stöds av källorna och avslutas med en hänvisning [n].";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CritiqueVerdict {
    Approved,
    /// Revise the draft according to the feedback
    Reject(String),
    /// The draft cannot be fixed by revision
    Unrepairable(String),
}

#[derive(Debug, Deserialize)]
struct CritiqueReply {
    approved: bool,
    #[serde(default)]
    feedback: String,
    #[serde(default = "default_repairable")]
    repairable: bool,
}

const fn default_repairable() -> bool {
    true
}

/// Every citation index in a text, in order of appearance
pub fn citation_indices(text: &str) -> Vec<usize> {
    let Some(re) = RE_CITATION.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .flat_map(|cap| {
            cap[1]
                .split([',', ';'])
                .filter_map(|n| n.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Split a draft into sentences. A terminator only ends a sentence when the
/// next visible character starts a new one, so "1 kap. 3 §" and trailing
/// "[n]" markers stay attached.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        let mut current = String::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            current.push(c);
            i += 1;
            if !matches!(c, '.' | '!' | '?') {
                continue;
            }
            let end = skip_citation_markers(&chars, i);
            let next = chars[end..].iter().find(|c| !c.is_whitespace());
            if next.map_or(true, |n| n.is_uppercase() || *n == '-') {
                current.extend(&chars[i..end]);
                i = end;
                sentences.push(std::mem::take(&mut current));
            }
        }
        sentences.push(current);
    }
    sentences
        .into_iter()
        .map(|s| s.trim().trim_start_matches(['-', '*', '•']).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Index just past any `[n]` markers (and the whitespace before them) at `from`
fn skip_citation_markers(chars: &[char], from: usize) -> usize {
    let mut end = from;
    loop {
        let mut k = end;
        while k < chars.len() && chars[k].is_whitespace() {
            k += 1;
        }
        if chars.get(k) != Some(&'[') {
            return end;
        }
        let Some(close) = chars[k..].iter().position(|&c| c == ']') else {
            return end;
        };
        let inner = &chars[k + 1..k + close];
        let is_marker = !inner.is_empty()
            && inner
                .iter()
                .all(|c| c.is_ascii_digit() || matches!(c, ',' | ';' | ' '));
        if !is_marker {
            return end;
        }
        end = k + close + 1;
    }
}

fn is_factual(sentence: &str) -> bool {
    if sentence.ends_with('?') || sentence.ends_with(':') || is_refusal(sentence) {
        return false;
    }
    let without_citations = RE_CITATION
        .as_ref()
        .map_or_else(|| sentence.to_string(), |re| re.replace_all(sentence, "").into_owned());
    without_citations
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphabetic))
        .count()
        >= MIN_CLAIM_WORDS
}

/// Citation rules that need no model: indices must point into the working
/// set and, in Evidence mode, every factual sentence must carry one.
pub fn check_citations(draft: &str, n_documents: usize, mode: ResponseMode) -> Result<(), String> {
    if draft.trim().is_empty() {
        return Err("Utkastet är tomt. Skriv ett svar utifrån källorna.".to_string());
    }
    if is_refusal(draft) {
        return Ok(());
    }

    let out_of_range: Vec<usize> = citation_indices(draft)
        .into_iter()
        .filter(|&n| n == 0 || n > n_documents)
        .collect();
    if !out_of_range.is_empty() {
        return Err(format!(
            "Hänvisningarna {out_of_range:?} pekar inte på någon källa. Använd endast [1] till [{n_documents}]."
        ));
    }

    if mode == ResponseMode::Evidence {
        if citation_indices(draft).is_empty() {
            return Err(
                "Svaret hänvisar inte till någon källa. Stöd varje påstående med en hänvisning [n]."
                    .to_string(),
            );
        }
        let uncited: Vec<String> = split_sentences(draft)
            .into_iter()
            .filter(|s| is_factual(s) && citation_indices(s).is_empty())
            .collect();
        if !uncited.is_empty() {
            let listed = uncited
                .iter()
                .take(3)
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(format!(
                "Följande påståenden saknar hänvisning [n] till en källa. Lägg till hänvisning eller ta bort påståendet:\n{listed}"
            ));
        }
    }
    Ok(())
}

pub struct Critic {
    generation: Arc<dyn GenerationClient>,
    policy_review: bool,
    params: GenerationParams,
    assembler: ContextAssembler,
}

impl Critic {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        policy_review: bool,
        max_context_chars: usize,
    ) -> Self {
        Self {
            generation,
            policy_review,
            params: GenerationParams::new(0.0, 400),
            assembler: ContextAssembler::new(max_context_chars),
        }
    }

    /// Judge a draft against the working set it was generated from
    pub async fn critique(
        &self,
        question: &str,
        draft: &str,
        documents: &[ScoredResult],
        mode: ResponseMode,
    ) -> CritiqueVerdict {
        let cited_range = self.assembler.included_count(documents);
        if let Err(feedback) = check_citations(draft, cited_range, mode) {
            debug!("Draft failed citation checks");
            return CritiqueVerdict::Reject(feedback);
        }
        if !self.policy_review || is_refusal(draft) {
            return CritiqueVerdict::Approved;
        }

        let mode_rule = match mode {
            ResponseMode::Evidence => {
                "4. Varje mening med ett faktapåstående måste avslutas med en hänvisning [n]."
            }
            _ => "4. Förklaringar och sammanfattningar utan hänvisning är tillåtna om de inte motsäger källorna.",
        };
        let prompt = RagPrompts::critique().render_with(&[
            ("mode_rule", mode_rule),
            ("question", question),
            ("context", &self.assembler.assemble(documents)),
            ("draft", draft),
        ]);

        match complete_structured::<CritiqueReply>(
            self.generation.as_ref(),
            &[ChatMessage::user(prompt)],
            &self.params,
        )
        .await
        {
            Ok(reply) if reply.approved => CritiqueVerdict::Approved,
            Ok(reply) => {
                let feedback = if reply.feedback.trim().is_empty() {
                    "Utkastet följer inte policyn. Håll dig strikt till källorna.".to_string()
                } else {
                    reply.feedback.trim().to_string()
                };
                if reply.repairable {
                    CritiqueVerdict::Reject(feedback)
                } else {
                    CritiqueVerdict::Unrepairable(feedback)
                }
            }
            Err(e) => {
                warn!("Policy critique unavailable in {} mode: {}", mode, e);
                match mode {
                    ResponseMode::Evidence => CritiqueVerdict::Reject(CRITIQUE_UNAVAILABLE.to_string()),
                    _ => CritiqueVerdict::Approved,
                }
            }
        }
    }
}
