//! `#name` variables and bracket arithmetic in parameters.

use crate::expr::{self, ExprError};
use std::collections::HashMap;
use tracing::info;

/// Upper bound on nested substitution passes.
const MAX_SUBSTITUTION_PASSES: usize = 16;

/// Variable table, alive for the whole interpreter session.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any previous value.
    pub fn define(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Replace every `#name` in `param` until nothing changes.
    ///
    /// Longer names are tried first so `#AB` is never read as `#A` + `B`.
    pub fn substitute(&self, param: &str) -> String {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut current = param.to_string();
        for _ in 0..MAX_SUBSTITUTION_PASSES {
            if !current.contains('#') {
                break;
            }
            let mut next = current.clone();
            for name in &names {
                next = next.replace(&format!("#{name}"), &self.values[*name]);
            }
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Substitute variables, then evaluate the bracket group of `param`.
    ///
    /// The group spans the first `[` to the last `]`; only that one group
    /// is evaluated.
    pub fn resolve(&self, param: &str) -> Result<String, ExprError> {
        let substituted = self.substitute(param);
        let Some(open) = substituted.find('[') else {
            return Ok(substituted);
        };
        let Some(close) = substituted.rfind(']').filter(|&close| close > open) else {
            return Ok(substituted);
        };

        let inner = &substituted[open + 1..close];
        let value = expr::evaluate(inner)?.to_string();
        info!("Evaluated parameter {} to {}", inner, value);
        Ok(format!(
            "{}{}{}",
            &substituted[..open],
            value,
            &substituted[close + 1..]
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> Variables {
        let mut vars = Variables::new();
        for (name, value) in entries {
            vars.define(name, value);
        }
        vars
    }

    #[test]
    fn bracket_with_variable() {
        let vars = table(&[("A", "10")]);
        assert_eq!(vars.resolve("X[#A+5]"), Ok("X15".to_string()));
    }

    #[test]
    fn variables_reference_variables() {
        let vars = table(&[("B", "#A*2"), ("A", "3")]);
        assert_eq!(vars.substitute("#B"), "3*2");
        assert_eq!(vars.resolve("Y[#B]"), Ok("Y6".to_string()));
    }

    #[test]
    fn longest_name_wins() {
        let vars = table(&[("A", "1"), ("AB", "2")]);
        assert_eq!(vars.substitute("#AB#A"), "21");
    }

    #[test]
    fn self_reference_is_bounded() {
        let vars = table(&[("A", "#A#A")]);
        let result = vars.substitute("#A");
        assert!(result.contains("#A"));
    }

    #[test]
    fn unknown_variable_is_kept() {
        let vars = Variables::new();
        assert_eq!(vars.resolve("X#missing"), Ok("X#missing".to_string()));
    }

    #[test]
    fn single_greedy_bracket_group() {
        let vars = Variables::new();
        // First '[' to last ']' is one group, which is not an expression.
        assert!(vars.resolve("X[1]Y[2]").is_err());
        assert_eq!(vars.resolve("X[(1+1)*3]F100"), Ok("X6F100".to_string()));
        assert_eq!(vars.resolve("X]1["), Ok("X]1[".to_string()));
        assert_eq!(vars.resolve("X[2.5*1]"), Ok("X2.5".to_string()));
    }

    #[test]
    fn division_keeps_a_fractional_part() {
        let vars = table(&[("W", "4")]);
        assert_eq!(vars.resolve("X[#W/2]"), Ok("X2.0".to_string()));
        assert_eq!(vars.resolve("Y[#W*0.5]"), Ok("Y2.0".to_string()));
        assert_eq!(vars.resolve("Y[#W-1]"), Ok("Y3".to_string()));
    }
}
