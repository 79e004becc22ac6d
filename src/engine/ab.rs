use crate::flow::AbBranch;
use crate::integrations::token::seeded_sample;

/// Pick an A/B branch for a session.
///
/// The sample is derived from the session id and the node key, never from a
/// global RNG, so the same session always lands on the same branch even
/// before the choice is persisted. Weights of zero everywhere mean uniform.
pub fn choose_branch<'a>(branches: &'a [AbBranch], session_id: &str, key: &str) -> Option<&'a str> {
    if branches.is_empty() {
        return None;
    }

    let total: u64 = branches.iter().map(|b| u64::from(b.weight)).sum();
    if total == 0 {
        let idx = seeded_sample(session_id, key, branches.len() as u64) as usize;
        return branches.get(idx).map(|b| b.label.as_str());
    }

    let mut point = seeded_sample(session_id, key, total);
    for branch in branches {
        let weight = u64::from(branch.weight);
        if point < weight {
            return Some(branch.label.as_str());
        }
        point -= weight;
    }
    branches.last().map(|b| b.label.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn branches(weights: &[(&str, u32)]) -> Vec<AbBranch> {
        weights
            .iter()
            .map(|(label, weight)| AbBranch {
                label: label.to_string(),
                weight: *weight,
            })
            .collect()
    }

    #[test]
    fn test_same_session_same_branch() {
        let b = branches(&[("a", 50), ("b", 50)]);
        let first = choose_branch(&b, "session-42", "flow:split");
        for _ in 0..20 {
            assert_eq!(choose_branch(&b, "session-42", "flow:split"), first);
        }
    }

    #[test]
    fn test_zero_weight_branch_never_chosen() {
        let b = branches(&[("never", 0), ("always", 10)]);
        for i in 0..200 {
            let session = format!("s{}", i);
            assert_eq!(choose_branch(&b, &session, "k"), Some("always"));
        }
    }

    #[test]
    fn test_weights_roughly_respected() {
        let b = branches(&[("a", 90), ("b", 10)]);
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for i in 0..1000 {
            let session = format!("session-{}", i);
            *counts.entry(choose_branch(&b, &session, "k").unwrap()).or_default() += 1;
        }
        assert!(counts["a"] > 800, "{:?}", counts);
        assert!(counts["b"] > 40, "{:?}", counts);
    }

    #[test]
    fn test_all_zero_weights_is_uniform_and_empty_is_none() {
        let b = branches(&[("a", 0), ("b", 0)]);
        assert!(choose_branch(&b, "s", "k").is_some());
        assert_eq!(choose_branch(&[], "s", "k"), None);
    }
}
