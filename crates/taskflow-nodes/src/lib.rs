//! Taskflow Nodes
//!
//! Built-in node handlers for the taskflow canvas engine. Each handler
//! registers itself with `inventory`, so linking this crate is enough for
//! [`NodeRegistry::with_builtins`] to find it.
//!
//! # Categories
//!
//! - **Research**: problem, data source, survey, analysis and report nodes
//! - **Canvas**: notes and pass-through default nodes

pub mod canvas;
mod fields;
pub mod http_fetcher;
pub mod research;

pub use canvas::*;
pub use http_fetcher::HttpFetcher;
pub use research::*;

use taskflow_engine::NodeRegistry;

/// Registry holding every handler in this crate
pub fn builtin_registry() -> NodeRegistry {
    NodeRegistry::with_builtins()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_engine::NodeKind;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), 7, "Expected 7 built-in node handlers");

        for kind in NodeKind::ALL {
            assert!(registry.has_kind(kind), "missing handler for {kind}");
        }

        // Spot-check the wire tags
        assert!(registry.has_node_type("problem"));
        assert!(registry.has_node_type("dataSource"));
        assert!(registry.has_node_type("analysis"));
        assert!(!registry.has_node_type("llm-inference"));
    }
}
