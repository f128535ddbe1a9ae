use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

const KEYWORDS: &[&str] = &[
    "MATCH", "INSERT", "DEFINE", "UNDEFINE", "DELETE", "GET", "FETCH", "ISA", "SUB", "OWNS",
    "PLAYS", "RELATES", "HAS", "ENTITY", "RELATION", "ATTRIBUTE", "RULE", "WHEN", "THEN",
    "VALUE", "ABSTRACT", "LIMIT", "OFFSET", "SORT", "COUNT",
];

/// Words after which the next token names a type
const TYPE_POSITIONS: &[&str] = &["sub", "owns", "plays", "relates", "isa"];

/// Keyword and type-name completion for the query editor.
///
/// Clones share the known type names, so a background task can refresh
/// them from the schema while the editor keeps using its copy.
#[derive(Debug, Clone, Default)]
pub struct Autocompleter {
    types: Arc<RwLock<BTreeSet<String>>>,
}

impl Autocompleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the known type names with those declared in `schema`.
    pub fn set_schema(&self, schema: &str) {
        let types = parse_type_names(schema);
        tracing::debug!(count = types.len(), "autocomplete types refreshed");
        *self.types.write().unwrap_or_else(PoisonError::into_inner) = types;
    }

    pub fn clear(&self) {
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn suggestions(&self, input: &str) -> Vec<String> {
        if input.is_empty() {
            return Vec::new();
        }
        let input_upper = input.to_uppercase();
        let input_lower = input.to_lowercase();

        let mut suggestions: Vec<String> = KEYWORDS
            .iter()
            .filter(|kw| kw.starts_with(&input_upper))
            .map(|kw| kw.to_lowercase())
            .collect();

        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        suggestions.extend(
            types
                .iter()
                .filter(|t| t.to_lowercase().starts_with(&input_lower))
                .cloned(),
        );

        suggestions.sort();
        suggestions.dedup();
        suggestions
    }
}

fn parse_type_names(schema: &str) -> BTreeSet<String> {
    let mut types = BTreeSet::new();
    for statement in schema.split([';', '\n']) {
        let tokens: Vec<&str> = statement
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        if let Some(first) = tokens.first().filter(|t| is_type_name(t)) {
            types.insert(first.to_string());
        }
        for pair in tokens.windows(2) {
            if TYPE_POSITIONS.contains(&pair[0]) && is_type_name(pair[1]) {
                types.insert(pair[1].to_string());
            }
        }
    }
    types
}

fn is_type_name(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next().is_some_and(|c| c.is_alphabetic())
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        && !KEYWORDS.contains(&token.to_uppercase().as_str())
}
