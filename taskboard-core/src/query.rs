// src/query.rs
//! Filter evaluation for the document-store query language
//!
//! The core never builds raw filters by hand: `constraint::Constraint`
//! produces them. This module evaluates those filters against JSON
//! documents, which is what the in-memory store and the `$match` stage use.
//!
//! ```
//! use serde_json::json;
//! use taskboard_core::query::matches_filter;
//!
//! let doc = json!({"project": "p1", "tags": []});
//! assert!(matches_filter(&doc, &json!({"tags": {"$size": 0}})).unwrap());
//! ```

pub mod operators;

pub use operators::matches_filter;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_must_be_object() {
        let err = matches_filter(&json!({}), &json!(["a"])).unwrap_err();
        assert!(err.to_string().contains("Filter must be an object"));
    }

    #[test]
    fn test_complex_nested() {
        let filter = json!({
            "$and": [
                {"$or": [{"company": {"$in": ["c1", null, ""]}}, {"company": {"$exists": false}}]},
                {"_id": "p1"}
            ]
        });
        assert!(matches_filter(&json!({"_id": "p1", "company": "c1"}), &filter).unwrap());
        assert!(matches_filter(&json!({"_id": "p1"}), &filter).unwrap());
        assert!(!matches_filter(&json!({"_id": "p1", "company": "c2"}), &filter).unwrap());
        assert!(!matches_filter(&json!({"_id": "p2", "company": "c1"}), &filter).unwrap());
    }
}
