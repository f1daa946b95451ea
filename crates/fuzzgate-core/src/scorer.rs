//! Reward shaping.
//!
//! Each terminal state maps to a fixed tier so that failing candidates still
//! get a signal proportional to how far they progressed:
//!
//! ```text
//! syntax_fail  -1.0
//! utility_fail -0.5
//! compile_fail +0.008
//! fuzz_fail    +0.04
//! success      0.04 + coverage_bonus + structure_bonus
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::gate::TerminalState;

/// Weights of the reward formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RewardPolicy {
    pub syntax_fail: f64,
    pub utility_fail: f64,
    pub compile_fail: f64,
    pub fuzz_fail: f64,
    pub success_base: f64,
    pub coverage_weight: f64,
    /// Fraction of the API surface treated as noise.
    pub coverage_floor: f64,
    pub structure_weight: f64,
    /// The utility gate passes only above this many distinct APIs.
    pub min_distinct_apis: usize,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            syntax_fail: -1.0,
            utility_fail: -0.5,
            compile_fail: 0.008,
            fuzz_fail: 0.04,
            success_base: 0.04,
            coverage_weight: 10.0,
            coverage_floor: 0.05,
            structure_weight: 0.5,
            min_distinct_apis: 3,
        }
    }
}

impl RewardPolicy {
    /// `coverage_weight * max(matched / total - coverage_floor, 0)`; zero for
    /// an empty API list.
    pub fn coverage_bonus(&self, matched: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let ratio = matched as f64 / total as f64;
        self.coverage_weight * (ratio - self.coverage_floor).max(0.0)
    }

    pub fn structure_bonus(&self, structures: usize) -> f64 {
        self.structure_weight * structures as f64
    }

    /// Tier reward for the non-success states.
    pub fn floor(&self, state: TerminalState) -> f64 {
        match state {
            TerminalState::SyntaxFail => self.syntax_fail,
            TerminalState::UtilityFail => self.utility_fail,
            TerminalState::CompileFail => self.compile_fail,
            TerminalState::FuzzFail => self.fuzz_fail,
            TerminalState::Success => self.success_base,
        }
    }
}

/// Structural complexity of a harness, in countable units.
pub trait StructureMetric: Send + Sync {
    fn name(&self) -> &'static str;

    fn measure(&self, source: &str) -> usize;
}

/// Counts `for`, `while` and `do` loops with regular expressions.
///
/// A heuristic, not a parser: comments and string literals are blanked
/// first, and the trailing `while (...);` of a `do` loop is not counted a
/// second time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopCounter;

fn blanking_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)//[^\n]*|/\*.*?\*/|"(?:\\.|[^"\\\n])*"|'(?:\\.|[^'\\\n])*'"#)
            .expect("valid regex")
    })
}

fn loop_res() -> &'static [Regex; 4] {
    static RES: OnceLock<[Regex; 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"\bfor\s*\(").expect("valid regex"),
            Regex::new(r"\bwhile\s*\(").expect("valid regex"),
            Regex::new(r"\bdo\s*\{").expect("valid regex"),
            Regex::new(r"\bwhile\s*\([^;{}]*\)\s*;").expect("valid regex"),
        ]
    })
}

/// Replace comments with a space and string/char literals with `""`.
pub fn strip_comments_and_literals(source: &str) -> String {
    blanking_re()
        .replace_all(source, |caps: &regex::Captures<'_>| {
            if caps[0].starts_with('/') {
                " ".to_string()
            } else {
                "\"\"".to_string()
            }
        })
        .into_owned()
}

impl StructureMetric for LoopCounter {
    fn name(&self) -> &'static str {
        "loop_count"
    }

    fn measure(&self, source: &str) -> usize {
        let code = strip_comments_and_literals(source);
        let [for_re, while_re, do_re, do_tail_re] = loop_res();
        let fors = for_re.find_iter(&code).count();
        let whiles = while_re.find_iter(&code).count();
        let dos = do_re.find_iter(&code).count();
        let do_tails = do_tail_re.find_iter(&code).count().min(dos);
        fors + whiles - do_tails + dos
    }
}

/// Known API names occurring in `source`, ordered by first occurrence and
/// de-duplicated. Matching is plain substring search.
pub fn match_apis(source: &str, apis: &[String]) -> Vec<String> {
    let mut hits: Vec<(usize, usize, &String)> = apis
        .iter()
        .enumerate()
        .filter(|(_, api)| !api.is_empty())
        .filter_map(|(rank, api)| source.find(api.as_str()).map(|pos| (pos, rank, api)))
        .collect();
    hits.sort_by_key(|&(pos, rank, _)| (pos, rank));

    let mut seen = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|(_, _, api)| seen.insert(api.as_str()))
        .map(|(_, _, api)| api.clone())
        .collect()
}

/// Combines a terminal state and the candidate's content into one scalar.
pub struct RewardScorer {
    policy: RewardPolicy,
    metric: Box<dyn StructureMetric>,
}

impl RewardScorer {
    pub fn new(policy: RewardPolicy) -> Self {
        Self::with_metric(policy, Box::new(LoopCounter))
    }

    pub fn with_metric(policy: RewardPolicy, metric: Box<dyn StructureMetric>) -> Self {
        Self { policy, metric }
    }

    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    pub fn metric_name(&self) -> &'static str {
        self.metric.name()
    }

    /// Reward for a finished evaluation.
    ///
    /// Bonuses apply to `Success` only; every other state returns its floor.
    pub fn score(
        &self,
        state: TerminalState,
        source: &str,
        matched_apis: usize,
        total_apis: usize,
    ) -> f64 {
        match state {
            TerminalState::Success => {
                self.policy.success_base
                    + self.policy.coverage_bonus(matched_apis, total_apis)
                    + self.policy.structure_bonus(self.metric.measure(source))
            }
            other => self.policy.floor(other),
        }
    }
}

impl Default for RewardScorer {
    fn default() -> Self {
        Self::new(RewardPolicy::default())
    }
}

impl std::fmt::Debug for RewardScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardScorer")
            .field("policy", &self.policy)
            .field("metric", &self.metric.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apis(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_floors_are_strictly_monotonic() {
        let p = RewardPolicy::default();
        let tiers = [
            p.floor(TerminalState::SyntaxFail),
            p.floor(TerminalState::UtilityFail),
            p.floor(TerminalState::CompileFail),
            p.floor(TerminalState::FuzzFail),
        ];
        assert!(tiers.windows(2).all(|w| w[0] < w[1]));
        assert!(p.floor(TerminalState::FuzzFail) <= p.success_base);
    }

    #[test]
    fn test_coverage_bonus_zero_without_apis() {
        assert_eq!(RewardPolicy::default().coverage_bonus(0, 0), 0.0);
        assert_eq!(RewardPolicy::default().coverage_bonus(5, 0), 0.0);
    }

    #[test]
    fn test_coverage_bonus_monotone() {
        let p = RewardPolicy::default();
        let mut last = -1.0;
        for matched in 0..=40 {
            let bonus = p.coverage_bonus(matched, 40);
            assert!(bonus >= last);
            last = bonus;
        }
        // 2 of 40 is exactly the noise floor.
        assert!(p.coverage_bonus(2, 40).abs() < 1e-12);
    }

    #[test]
    fn test_loop_counter_basic_forms() {
        let src = r#"
            for (int i = 0; i < n; i++) { a(); }
            for (auto &x : items) { b(x); }
            while (p != nullptr) p = p->next;
            do { step(); } while (more());
        "#;
        assert_eq!(LoopCounter.measure(src), 4);
    }

    #[test]
    fn test_loop_counter_ignores_comments_and_strings() {
        let src = r#"
            // for (;;) {}
            /* while (1) { } */
            const char *s = "for (x) while (y)";
            int forward = 0; int dowhile = 1;
        "#;
        assert_eq!(LoopCounter.measure(src), 0);
    }

    #[test]
    fn test_loop_counter_while_after_if_block_counts() {
        let src = "if (a) { b(); } while (c) { d(); }";
        assert_eq!(LoopCounter.measure(src), 1);
    }

    #[test]
    fn test_match_apis_first_occurrence_order() {
        let known = apis(&["cJSON_Delete", "cJSON_Parse", "cJSON_Print", "cJSON_Unused"]);
        let src = "cJSON_Parse(x); cJSON_Print(y); cJSON_Parse(z); cJSON_Delete(x);";
        assert_eq!(
            match_apis(src, &known),
            apis(&["cJSON_Parse", "cJSON_Print", "cJSON_Delete"])
        );
    }

    #[test]
    fn test_match_apis_prefix_names_both_match() {
        let known = apis(&["cJSON_Parse", "cJSON_ParseWithOpts"]);
        let src = "cJSON_ParseWithOpts(buf, NULL, 0);";
        assert_eq!(
            match_apis(src, &known),
            apis(&["cJSON_Parse", "cJSON_ParseWithOpts"])
        );
    }

    #[test]
    fn test_match_apis_duplicates_in_list() {
        let known = apis(&["f", "f", ""]);
        assert_eq!(match_apis("f()", &known), apis(&["f"]));
    }

    #[test]
    fn test_success_reward_example() {
        let scorer = RewardScorer::default();
        let src = "for (int i = 0; i < 2; i++) {}\nfor (int j = 0; j < 2; j++) {}";
        let reward = scorer.score(TerminalState::Success, src, 5, 20);
        assert!((reward - 3.04).abs() < 1e-9, "got {reward}");
    }

    #[test]
    fn test_failure_states_ignore_bonuses() {
        let scorer = RewardScorer::default();
        let src = "for (;;) {} for (;;) {}";
        assert_eq!(scorer.score(TerminalState::CompileFail, src, 20, 20), 0.008);
        assert_eq!(scorer.score(TerminalState::FuzzFail, src, 20, 20), 0.04);
        assert_eq!(scorer.score(TerminalState::SyntaxFail, src, 20, 20), -1.0);
        assert_eq!(scorer.score(TerminalState::UtilityFail, src, 20, 20), -0.5);
    }

    #[test]
    fn test_custom_metric_swaps_in() {
        struct Fixed;
        impl StructureMetric for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }
            fn measure(&self, _source: &str) -> usize {
                4
            }
        }
        let scorer = RewardScorer::with_metric(RewardPolicy::default(), Box::new(Fixed));
        assert_eq!(scorer.metric_name(), "fixed");
        let reward = scorer.score(TerminalState::Success, "", 0, 10);
        assert!((reward - 2.04).abs() < 1e-9);
    }
}
