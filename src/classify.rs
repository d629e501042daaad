//! Query/mutation classification of GraphQL request bodies.
//!
//! Only the `query` field's leading keyword is inspected. Anything that does
//! not clearly start with `mutation` is treated as cacheable, including bodies
//! that are not JSON at all; the backend reports real errors for those.
//!
//! Known limitation: a document with a comment or directive before the
//! `mutation` keyword (`# note\nmutation { .. }`) is classified as a query.

/// Kind of GraphQL operation carried by a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Queries and subscriptions. Cacheable.
    Query,
    /// Writes. Always forwarded, never cached.
    Mutation,
}

impl Operation {
    pub fn is_mutation(self) -> bool {
        self == Operation::Mutation
    }
}

/// Classify a raw request body.
pub fn classify(body: &[u8]) -> Operation {
    let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(body) else {
        return Operation::Query;
    };
    match parsed.get("query").and_then(|q| q.as_str()) {
        Some(doc) if is_mutation_document(doc) => Operation::Mutation,
        _ => Operation::Query,
    }
}

fn is_mutation_document(doc: &str) -> bool {
    let stripped: String = doc.chars().filter(|c| !c.is_whitespace()).collect();
    stripped.starts_with("mutation")
}
