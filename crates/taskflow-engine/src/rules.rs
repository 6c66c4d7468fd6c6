//! Which node kinds may feed which

use serde::{Deserialize, Serialize};

use crate::types::NodeKind;

/// Answer to a connection query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub allowed: bool,
}

impl Connection {
    pub const ALLOWED: Connection = Connection { allowed: true };
    pub const DENIED: Connection = Connection { allowed: false };
}

/// Decides whether an edge between two kinds may be created
pub trait ConnectionRules: Send + Sync {
    fn can_connect(&self, source: NodeKind, target: NodeKind) -> Connection;
}

/// The canvas' default rule table
///
/// Research flows run problem → sources/surveys → analysis → report.
/// Notes and default nodes are free-form and connect to anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanvasConnectionRules;

impl ConnectionRules for CanvasConnectionRules {
    fn can_connect(&self, source: NodeKind, target: NodeKind) -> Connection {
        use NodeKind::*;

        let allowed = match (source, target) {
            (Note | Default, _) | (_, Note | Default) => true,
            (Problem, DataSource | Survey) => true,
            (DataSource, Survey | Analysis) => true,
            (Survey, Analysis) => true,
            (Analysis, Report) => true,
            (Problem | DataSource | Survey | Analysis | Report, _) => false,
        };
        Connection { allowed }
    }
}

/// Rules that accept every pairing
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllConnections;

impl ConnectionRules for AllowAllConnections {
    fn can_connect(&self, _source: NodeKind, _target: NodeKind) -> Connection {
        Connection::ALLOWED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canvas_rules_table() {
        let rules = CanvasConnectionRules;
        let allowed = |s, t| rules.can_connect(s, t).allowed;

        assert!(allowed(NodeKind::Problem, NodeKind::DataSource));
        assert!(allowed(NodeKind::Problem, NodeKind::Survey));
        assert!(allowed(NodeKind::DataSource, NodeKind::Analysis));
        assert!(allowed(NodeKind::Survey, NodeKind::Analysis));
        assert!(allowed(NodeKind::Analysis, NodeKind::Report));

        assert!(!allowed(NodeKind::Problem, NodeKind::Analysis));
        assert!(!allowed(NodeKind::Survey, NodeKind::Problem));
        assert!(!allowed(NodeKind::Report, NodeKind::Problem));
        assert!(!allowed(NodeKind::Analysis, NodeKind::DataSource));
    }

    #[test]
    fn test_free_form_kinds_connect_to_anything() {
        let rules = CanvasConnectionRules;
        for kind in NodeKind::ALL {
            assert!(rules.can_connect(NodeKind::Note, kind).allowed);
            assert!(rules.can_connect(kind, NodeKind::Default).allowed);
        }
    }
}
