//! Lexical and type-based score boosts applied after vector search.

use serde_json::Value;

use rulevault_shared::SearchResult;

const EXACT_MATCH_BOOST: f32 = 1.5;
const TYPE_MATCH_BOOST: f32 = 1.3;
const TABLE_BOOST: f32 = 1.2;

/// Boost and re-sort results in place of their raw similarity order.
///
/// Boosts multiply, so a score can end up above 1.0. The result is a
/// ranking signal only.
pub fn rerank(query: &str, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    let query_lower = query.to_lowercase();
    let wants_spell = query_lower.contains("spell");
    let wants_feat = query_lower.contains("feat");
    let wants_table = query_lower.contains("table");

    for result in &mut results {
        let chunk_type = result
            .metadata
            .get("chunk_type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut boost = 1.0;
        if !query_lower.is_empty() && result.text.to_lowercase().contains(&query_lower) {
            boost *= EXACT_MATCH_BOOST;
        }
        if (wants_spell && chunk_type == "spell") || (wants_feat && chunk_type == "feat") {
            boost *= TYPE_MATCH_BOOST;
        }
        if wants_table && chunk_type == "table" {
            boost *= TABLE_BOOST;
        }
        result.score *= boost;
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(text: &str, score: f32, chunk_type: &str) -> SearchResult {
        SearchResult {
            text: text.into(),
            score,
            metadata: json!({ "chunk_type": chunk_type })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            source_reference: String::new(),
        }
    }

    #[test]
    fn type_boost_reorders() {
        let ranked = rerank(
            "fireball spell",
            vec![
                result("fireball is great", 0.8, "spell"),
                result("lightning bolt", 0.9, "text"),
            ],
        );
        assert_eq!(ranked[0].text, "fireball is great");
        assert!(ranked[0].score > 0.9);
        assert!((ranked[1].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn exact_match_and_table_boosts_stack() {
        let ranked = rerank(
            "weapon table",
            vec![result("The Weapon Table lists damage", 0.7, "table")],
        );
        assert!((ranked[0].score - 0.7 * 1.5 * 1.2).abs() < 1e-5);
    }

    #[test]
    fn unrelated_results_keep_scores() {
        let ranked = rerank(
            "grapple",
            vec![result("Opportunity attacks", 0.6, "rule"), result("Shove", 0.65, "rule")],
        );
        assert_eq!(ranked[0].text, "Shove");
        assert!((ranked[1].score - 0.6).abs() < 1e-6);
    }
}
