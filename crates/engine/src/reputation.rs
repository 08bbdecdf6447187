//! Reputation scores supplied by other components.

use crate::context::Connection;

/// What a reputation source knows about a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryLookup {
    /// The source left no results on the connection at all.
    Missing,
    /// Negative is bad, zero neutral, positive good.
    Score(f64),
    /// The source reported something that is not a number.
    Unparseable(String),
}

/// A by-name reference to a component that scores connections.
///
/// The engine never owns the scoring component; it only asks for the score
/// it left on the connection.
pub trait ReputationSource: Send + Sync {
    fn name(&self) -> &str;

    fn lookup(&self, conn: &Connection) -> HistoryLookup;
}

/// Reads the score another component wrote into the connection's result
/// annotations, by default under the `history` fact.
#[derive(Debug, Clone)]
pub struct ResultsReputation {
    component: String,
    field: String,
}

impl ResultsReputation {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            field: "history".to_string(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

impl ReputationSource for ResultsReputation {
    fn name(&self) -> &str {
        &self.component
    }

    fn lookup(&self, conn: &Connection) -> HistoryLookup {
        if !conn.results.has_component(&self.component) {
            return HistoryLookup::Missing;
        }
        match conn.results.fact(&self.component, &self.field) {
            None => HistoryLookup::Unparseable(String::new()),
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(score) if score.is_finite() => HistoryLookup::Score(score),
                _ => HistoryLookup::Unparseable(raw),
            },
        }
    }
}
