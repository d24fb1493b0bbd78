//! Instruction strings sent to the completion service.

use super::types::AnalysisMode;

/// Vision instruction for one page image.
///
/// Routine terms may be summarised; anything with legal or financial weight
/// must come back verbatim because classification depends on it.
pub const PAGE_EXTRACTION_PROMPT: &str = "\
You are a highly capable contract analyzer. Your role is to help users quickly analyze lengthy contracts. \
Your responsibilities are:

1. Carefully read each clause, term or condition in the contract.
2. If the terms, conditions or clauses are general or straightforward, summarize them while keeping their technical meaning.
3. If the terms, conditions, clauses or obligations are advanced, complex or crucial (legal or financial terms with \
significant implications), extract the exact full text without summarizing or omitting any part. \
Further analysis depends on your output.
4. Use a structured format with a title for each clause.
5. Prioritize accuracy. Do not leave out any important detail.

Do not introduce the page. Respond in plain text with clear titles and subheadings.";

/// Vision instruction for all page images of one batch in a single request.
pub const BATCH_EXTRACTION_PROMPT: &str = "\
You are a meticulous contract reviewer. The images are consecutive pages of one contract, in order. \
Extract ALL important points, terms, conditions and obligations that must not be missed. \
Include specific numbers, dates and key details. \
Pay special attention to financial terms, deadlines, obligations, responsibilities, limitations, restrictions \
and legal requirements.

Provide the full text of the important sections and clauses exactly as written in the contract. \
Nothing should be missed.";

const DETAILED_TEMPLATE: &str = r#"You are a highly skilled legal expert analyzing a contract. Explain each clause so the user fully understands their rights, obligations and potential risks.

1. Clause identification: break this contract part into individual clauses. For each one give a clear, detailed explanation in plain language while keeping legal accuracy.
2. Critical clauses: pay special attention to clauses that
   - are tricky or ambiguous,
   - pose legal or financial risk (indemnity, liability, exclusivity, termination conditions),
   - have long-term consequences (renewal, non-compete, intellectual property),
   - could be interpreted in different ways.
   Explain their implications in depth and what the user must be cautious about.
3. General clauses: explain standard clauses concisely. Merge similar ones and say when no significant risk is involved.
4. Plain language: avoid legal jargon unless necessary, and explain it when you use it.

Return between 1 and {max_records} clauses that together cover this entire contract part. Merge similar generic clauses if needed. Explain what the contract says the user agrees to ("it says that you ...").

Respond with a JSON array and nothing else:
[
    {
        "clause_title": "Title",
        "description": "Detailed explanation of the clause"
    }
]

Here is the contract:
{contract_text}"#;

const SUMMARY_TEMPLATE: &str = r#"Analyze this contract section and identify ONLY the potentially risky, sneaky or serious clauses the user should be aware of. Focus on clauses that:

1. Have significant financial implications
2. Restrict future opportunities or actions
3. Create binding long-term commitments
4. Have unusual or potentially unfair terms
5. Contain hidden obligations or penalties

For each serious clause give a topic that says what the clause is about, and a 2-3 sentence description of what it means and how it affects the user in everyday language ("you agree to ...", "you will not ...").

Return at most {max_records} clauses. Skip standard, non-controversial clauses. If no serious clauses are found, return an empty array.

Respond with a JSON array and nothing else:
[
    {
        "topic": "Clear topic of the clause",
        "description": "What the clause means and its implications"
    }
]

Here is the contract section:
{contract_text}"#;

/// Build the classification prompt for one batch of extracted text.
pub fn build_classification_prompt(
    mode: AnalysisMode,
    contract_text: &str,
    max_records: usize,
) -> String {
    let template = match mode {
        AnalysisMode::Detailed => DETAILED_TEMPLATE,
        AnalysisMode::Summary => SUMMARY_TEMPLATE,
    };
    template
        .replace("{max_records}", &max_records.to_string())
        .replace("{contract_text}", contract_text)
}

/// Instruction for plain-language analysis of a terms-and-conditions text.
pub fn build_terms_prompt(terms_text: &str) -> String {
    format!(
        "Here are terms and conditions that the user is about to accept.\n\
         <terms>\n{terms_text}\n</terms>\n\n\
         Explain to the user what they contain, concisely and without leaving anything out. \
         Phrase it as \"it says that you agree to ...\" so the user does not need to read the whole text. \
         Act as a careful assistant that stops the user from accepting harmful terms.\n\n\
         Use two sections:\n\
         1. Concerning and risky: list sneaky, highly risky or irrelevant terms first.\n\
         2. General: everything else.\n\
         A term listed under the first section must not be repeated in the second. \
         For each term state what is written, then what it means.\n\n\
         Respond in Markdown."
    )
}

/// Instruction for the single-call legal review of one clause.
pub fn build_implications_prompt(clause_title: &str, clause_description: &str) -> String {
    format!(
        "You are a legal domain analyst and contract reviewer.\n\n\
         Clause: {clause_title}\n\
         {clause_description}\n\n\
         Determine the legal standing of this clause and any potential legal issues, compared with \
         standard clauses of this kind. Assess its benefits and risks for the user, and recommend \
         counters or modifications. Answer in a single detailed paragraph."
    )
}

/// Instruction for the review email summarising per-clause decisions.
pub fn build_email_prompt(decisions_json: &str) -> String {
    format!(
        "Generate a formal contract review email based on these decisions:\n\
         {decisions_json}\n\n\
         Include:\n\
         1. Professional introduction\n\
         2. Which clauses are accepted, with a short relevant explanation\n\
         3. Which clauses are countered, explaining each counter proposal\n\
         4. Which clauses are rejected\n\
         5. Next steps\n\n\
         Respond in plain text."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detailed_prompt_embeds_text_and_cap() {
        let prompt = build_classification_prompt(AnalysisMode::Detailed, "CLAUSE 7. Termination", 4);
        assert!(prompt.contains("CLAUSE 7. Termination"));
        assert!(prompt.contains("between 1 and 4 clauses"));
        assert!(prompt.contains("\"clause_title\""));
        assert!(!prompt.contains("{contract_text}"));
    }

    #[test]
    fn summary_prompt_uses_topic_field() {
        let prompt = build_classification_prompt(AnalysisMode::Summary, "text", 3);
        assert!(prompt.contains("\"topic\""));
        assert!(prompt.contains("at most 3 clauses"));
        assert!(prompt.contains("empty array"));
    }

    #[test]
    fn contract_text_with_braces_is_inserted_verbatim() {
        let prompt = build_classification_prompt(AnalysisMode::Detailed, "fee {max_records}", 4);
        // The cap placeholder is substituted before the contract text is inserted
        assert!(prompt.contains("fee {max_records}"));
    }

    #[test]
    fn terms_prompt_has_two_sections() {
        let prompt = build_terms_prompt("You waive all rights.");
        assert!(prompt.contains("You waive all rights."));
        assert!(prompt.contains("Concerning and risky"));
        assert!(prompt.contains("General"));
    }

    #[test]
    fn email_prompt_embeds_decisions() {
        let prompt = build_email_prompt("[{\"clause\":\"Fees\"}]");
        assert!(prompt.contains("\"clause\":\"Fees\""));
        assert!(prompt.contains("Next steps"));
    }
}
