//! Context assembly from the graded working set

use crate::cli::output::truncate_str;
use crate::models::ScoredResult;

/// Numbers documents as `[n]` blocks so answers can cite them
pub struct ContextAssembler {
    max_context_length: usize,
}

impl ContextAssembler {
    #[must_use]
    pub const fn new(max_context_length: usize) -> Self {
        Self { max_context_length }
    }

    /// Assemble context from the working set.
    ///
    /// Numbering follows working-set order, so `[n]` in an answer refers to
    /// `documents[n - 1]`. When the budget runs out, the first block is still
    /// included (truncated) and the remaining documents are dropped.
    #[must_use]
    pub fn assemble(&self, documents: &[ScoredResult]) -> String {
        let mut context = String::new();
        let mut total_length = 0;

        for (idx, result) in documents.iter().enumerate() {
            let entry = self.format_entry(idx + 1, result);
            let entry_length = entry.chars().count();

            if total_length + entry_length > self.max_context_length {
                if idx == 0 {
                    context.push_str(&truncate_str(&entry, self.max_context_length));
                }
                break;
            }

            context.push_str(&entry);
            total_length += entry_length;
        }

        context
    }

    /// Number of documents that fit in the budget, i.e. valid citation indices
    #[must_use]
    pub fn included_count(&self, documents: &[ScoredResult]) -> usize {
        let mut total_length = 0;
        for (idx, result) in documents.iter().enumerate() {
            total_length += self.format_entry(idx + 1, result).chars().count();
            if total_length > self.max_context_length {
                return idx.max(1).min(documents.len());
            }
        }
        documents.len()
    }

    fn format_entry(&self, number: usize, result: &ScoredResult) -> String {
        let doc = &result.document;
        let mut header = format!("[{number}] {}", doc.label());
        if let Some(date) = &doc.metadata.date {
            header.push_str(&format!(" ({date})"));
        }
        header.push_str(&format!(" | källa: {}", doc.source_collection));
        format!("{header}\n{}\n\n", doc.text.trim())
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(12_000)
    }
}
