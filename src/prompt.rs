use crate::database::SearchHit;
use crate::history::{Message, Role};

/// Reply the model is told to give when the context does not cover the question
pub const INSUFFICIENT_CONTEXT: &str =
    "The provided documents do not contain sufficient information to answer this question.";

/// Build the system instruction constraining the model to the retrieved context
pub fn system_prompt() -> String {
    format!(
        "You are a professional analyst. Your task is to answer questions using ONLY the provided context.

STRICT ADHERENCE RULES:
1. TRUTHFULNESS: If the answer is not contained within the context, state: \"{}\"
2. NO EXTERNAL KNOWLEDGE: Do not use any outside information or previous training data to supplement your answer.
3. CITATIONS: If a source name is provided in the context, cite it at the end of every sentence or paragraph (e.g., [Source: report.pdf]).
4. FORMATTING: Use clear, concise bullet points for complex answers.",
        INSUFFICIENT_CONTEXT
    )
}

/// Concatenate retrieved chunks, each labelled with the file it came from
pub fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            let label = match hit.chunk.page {
                Some(page) => format!("[Source: {}, part {}]", hit.chunk.source, page + 1),
                None => format!("[Source: {}]", hit.chunk.source),
            };
            format!("{}\n{}", label, hit.chunk.text)
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Assemble the system and user messages for one grounded question
pub fn build_messages(question: &str, hits: &[SearchHit]) -> Vec<Message> {
    let user = format!(
        "<CONTEXT>
{}
</CONTEXT>

<USER_QUESTION>
{}
</USER_QUESTION>

TASK: Based on the <CONTEXT> above, provide a direct answer to the <USER_QUESTION>. If the context is irrelevant to the question, inform the user accordingly.",
        format_context(hits),
        question
    );

    vec![
        Message::new(Role::System, system_prompt()),
        Message::new(Role::User, user),
    ]
}
