//! Prompt templates for retrieval, grading, critique and answer generation

use std::collections::HashMap;

/// Template for generating prompts
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    variables: Vec<String>,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let variables = extract_variables(&template);
        Self {
            template,
            variables,
        }
    }

    /// Fill in the template with variables
    #[must_use]
    pub fn render(&self, values: &HashMap<&str, String>) -> String {
        let mut result = self.template.clone();
        for var in &self.variables {
            if let Some(value) = values.get(var.as_str()) {
                result = result.replace(&format!("{{{{{var}}}}}"), value);
            }
        }
        result
    }

    /// Convenience wrapper for a fixed list of pairs
    #[must_use]
    pub fn render_with(&self, pairs: &[(&str, &str)]) -> String {
        let values: HashMap<&str, String> =
            pairs.iter().map(|(k, v)| (*k, (*v).to_string())).collect();
        self.render(&values)
    }

    /// Get required variables
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }
}

/// Extract variable names from template
fn extract_variables(template: &str) -> Vec<String> {
    let mut variables = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next(); // skip second '{'
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch == '}' {
                    chars.next();
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        break;
                    }
                } else {
                    var_name.push(ch);
                    chars.next();
                }
            }
            if !var_name.is_empty() && !variables.contains(&var_name) {
                variables.push(var_name);
            }
        }
    }

    variables
}

/// Standard prompt templates
pub struct RagPrompts;

impl RagPrompts {
    /// System prompt for evidence mode: every claim cites a source
    #[must_use]
    pub fn evidence_system() -> PromptTemplate {
        PromptTemplate::new(
            r"Du är en juridisk informationsassistent för svenska författningar och myndighetsdokument.

Regler:
1. Svara ENDAST utifrån källorna nedan. Använd ingen annan kunskap.
2. Varje mening som innehåller ett faktapåstående ska avslutas med en hänvisning i formen [n], där n är källans nummer.
3. Om källorna inte räcker för att besvara frågan, svara exakt: {{refusal}}
4. Prioritera lagtext (SFS) framför kommentarer och förarbeten.
5. Svara på svenska, sakligt och koncist.

Källor:
{{context}}",
        )
    }

    /// System prompt for assist mode: grounded but explanatory
    #[must_use]
    pub fn assist_system() -> PromptTemplate {
        PromptTemplate::new(
            r"Du är en hjälpsam assistent som förklarar svensk lagstiftning och offentliga dokument.

Riktlinjer:
1. Utgå från källorna nedan och hänvisa med [n] där det är möjligt.
2. Du får förklara och sammanfatta, men hitta inte på paragrafer, datum eller SFS-nummer.
3. Om källorna saknar svar, säg det tydligt.

Källor:
{{context}}",
        )
    }

    /// System prompt for conversational turns without retrieval
    #[must_use]
    pub fn chat_system() -> PromptTemplate {
        PromptTemplate::new(
            r"Du är en vänlig assistent för frågor om svensk lagstiftning. Detta är ett samtalsinlägg som inte kräver källor. Svara kort och naturligt på svenska. Ge inga juridiska sakuppgifter utan källor; be användaren ställa en konkret fråga om det behövs.",
        )
    }

    /// Binary relevance classification for one document
    #[must_use]
    pub fn grade_document() -> PromptTemplate {
        PromptTemplate::new(
            r"Du bedömer om ett dokument är relevant för en fråga.

Fråga: {{question}}

Dokument:
{{document}}

Innehåller dokumentet information som hjälper till att besvara frågan? Svara med ett enda ord: ja eller nej.",
        )
    }

    /// Policy critique of a draft answer, answered as JSON
    #[must_use]
    pub fn critique() -> PromptTemplate {
        PromptTemplate::new(
            r#"Granska ett utkast till svar mot källorna.

Policy:
1. Varje faktapåstående måste stödjas av källorna.
2. Hänvisningar [n] måste peka på en källa som faktiskt stödjer påståendet.
3. Inga påhittade paragrafer, datum eller SFS-nummer.
{{mode_rule}}

Fråga: {{question}}

Källor:
{{context}}

Utkast:
{{draft}}

Svara med JSON: {"approved": true|false, "feedback": "konkret instruktion för att rätta utkastet", "repairable": true|false}"#,
        )
    }

    /// Resolve pronouns and ellipsis against conversation history
    #[must_use]
    pub fn decontextualize() -> PromptTemplate {
        PromptTemplate::new(
            r"Skriv om den sista frågan så att den går att förstå utan samtalshistoriken. Ersätt pronomen och underförstådda syftningar med det de syftar på. Behåll språket. Svara endast med den omskrivna frågan.

Historik:
{{history}}

Sista fråga: {{question}}",
        )
    }

    /// Query variants for RAG-Fusion
    #[must_use]
    pub fn query_variants() -> PromptTemplate {
        PromptTemplate::new(
            r"Skapa {{count}} alternativa sökfrågor för att hitta svenska rättskällor till frågan nedan, en per rad, utan numrering:
1. en semantisk omformulering
2. en nyckelordsform med juridiska termer
3. en alternativ formulering med andra ord

Fråga: {{question}}",
        )
    }

    /// Broader reformulation after a retrieval round found nothing relevant
    #[must_use]
    pub fn transform_query() -> PromptTemplate {
        PromptTemplate::new(
            r"Sökningen efter relevanta dokument gav inga träffar. Formulera om sökfrågan bredare och med andra juridiska begrepp så att relevanta lagar eller myndighetsdokument kan hittas. Svara endast med den nya sökfrågan.

Ursprunglig fråga: {{question}}
Föregående sökfråga: {{previous}}",
        )
    }
}
