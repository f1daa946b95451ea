//! Static API-diversity check.

use fuzzgate_core::record::render_list_literal;
use fuzzgate_core::{match_apis, GateResult};

/// Rejects harnesses that touch too few distinct known APIs.
#[derive(Debug, Clone, Copy)]
pub struct UtilityGate {
    min_distinct_apis: usize,
}

impl UtilityGate {
    pub fn new(min_distinct_apis: usize) -> Self {
        Self { min_distinct_apis }
    }

    /// Passes only when strictly more than `min_distinct_apis` APIs occur.
    ///
    /// Returns the matched names in first-occurrence order either way.
    pub fn check(&self, source: &str, apis: &[String]) -> (GateResult, Vec<String>) {
        let matched = match_apis(source, apis);
        let result = if matched.len() > self.min_distinct_apis {
            GateResult::Pass
        } else {
            GateResult::Fail(format!(
                "less than {} APIs: {}",
                self.min_distinct_apis + 1,
                render_list_literal(&matched)
            ))
        };
        (result, matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apis() -> Vec<String> {
        ["cJSON_Parse", "cJSON_Print", "cJSON_Delete", "cJSON_GetObjectItem", "cJSON_free"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_exactly_three_fails() {
        let src = "cJSON_Parse(d); cJSON_Print(j); cJSON_Delete(j);";
        let (result, matched) = UtilityGate::new(3).check(src, &apis());
        assert_eq!(matched.len(), 3);
        assert_eq!(
            result,
            GateResult::Fail(
                "less than 4 APIs: ['cJSON_Parse', 'cJSON_Print', 'cJSON_Delete']".to_string()
            )
        );
    }

    #[test]
    fn test_four_passes() {
        let src = "cJSON_Parse(d); cJSON_GetObjectItem(j, k); cJSON_Print(j); cJSON_Delete(j);";
        let (result, matched) = UtilityGate::new(3).check(src, &apis());
        assert!(result.is_pass());
        assert_eq!(matched[1], "cJSON_GetObjectItem");
    }

    #[test]
    fn test_repeated_calls_count_once() {
        let src = "cJSON_Parse(a); cJSON_Parse(b); cJSON_Parse(c); cJSON_Parse(d);";
        let (result, matched) = UtilityGate::new(3).check(src, &apis());
        assert!(!result.is_pass());
        assert_eq!(matched, vec!["cJSON_Parse"]);
    }

    #[test]
    fn test_empty_api_list_fails() {
        let (result, matched) = UtilityGate::new(3).check("anything", &[]);
        assert!(!result.is_pass());
        assert!(matched.is_empty());
    }
}
