use crate::model::Session;

/// Illustrative USD prices per 1K tokens, keyed by model-name prefix.
/// These approximate published list prices and are not kept in sync with
/// any provider; cost figures derived from them are estimates only.
pub const MODEL_PRICES_PER_1K: &[(&str, f64)] = &[
    ("gpt-4o-mini", 0.0006),
    ("gpt-4o", 0.01),
    ("gpt-4-turbo", 0.03),
    ("gpt-4", 0.06),
    ("gpt-3.5-turbo", 0.002),
];

/// Fallback for models absent from the table.
pub const DEFAULT_PRICE_PER_1K: f64 = 0.002;

/// Price per 1K tokens for `model`, by longest matching prefix. Dated
/// variants ("gpt-4o-mini-2024-07-18") resolve to their base model.
pub fn price_per_1k(model: &str) -> f64 {
    MODEL_PRICES_PER_1K
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE_PER_1K)
}

/// Estimated cost of a session: recorded tokens × unit price.
pub fn session_cost(session: &Session, model: &str) -> f64 {
    session.total_tokens() as f64 / 1000.0 * price_per_1k(model)
}
