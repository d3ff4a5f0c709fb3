//! Request Pricing Rules
//!
//! The controller only needs a [`CostCalculator`]: a pure function from
//! endpoint ids and request parameters to a [`Cost`]. [`EndpointRules`] is the
//! configured implementation: every endpoint whitelists its arguments and
//! prices each parameter value through an ordered list of [`Rule`]s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::cost::Cost;
use super::error::{ShieldError, ShieldResult};

/// Prices a request. Implementations must be deterministic for a given
/// configuration and must never look at per-user state.
pub trait CostCalculator: Send + Sync {
    fn compute_cost(
        &self,
        endpoint_ids: &[String],
        request: &[(String, String)],
    ) -> ShieldResult<Cost>;
}

/// Calculator that prices every request the same
#[derive(Debug, Clone)]
pub struct FixedCost(pub Cost);

impl CostCalculator for FixedCost {
    fn compute_cost(&self, _: &[String], _: &[(String, String)]) -> ShieldResult<Cost> {
        Ok(self.0.clone())
    }
}

/// A single pricing rule for an argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    /// Integer value inside the inclusive `[min, max]` range
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
        cost: Cost,
    },
    /// Value equal to one of `values`
    Values { values: Vec<String>, cost: Cost },
    /// Any value
    Any { cost: Cost },
}

impl Rule {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Rule::Integer { min, max, .. } => match value.trim().parse::<i64>() {
                Ok(n) => min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi),
                Err(_) => false,
            },
            Rule::Values { values, .. } => values.iter().any(|v| v == value),
            Rule::Any { .. } => true,
        }
    }

    pub fn cost(&self) -> &Cost {
        match self {
            Rule::Integer { cost, .. } | Rule::Values { cost, .. } | Rule::Any { cost } => cost,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Rule::Integer {
            min: Some(lo),
            max: Some(hi),
            ..
        } = self
        {
            if lo > hi {
                anyhow::bail!("Integer rule has min {} greater than max {}", lo, hi);
            }
        }
        Ok(())
    }
}

/// A whitelisted request parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Argument {
    /// Cost when no rule matches
    pub default: Cost,

    /// Tried in order, first match wins
    pub rules: Vec<Rule>,
}

impl Argument {
    pub fn price(&self, value: &str) -> &Cost {
        self.rules
            .iter()
            .find(|rule| rule.matches(value))
            .map(Rule::cost)
            .unwrap_or(&self.default)
    }
}

/// A backend resource such as a search collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    /// Filled from the configuration table key
    pub id: String,

    /// Cost of any call to the endpoint
    pub base: Cost,

    /// Whitelisted parameters
    pub arguments: HashMap<String, Argument>,
}

impl Endpoint {
    /// Price a request against this endpoint.
    ///
    /// A parameter missing from the whitelist turns the cost into a stop.
    pub fn calculate_cost(&self, request: &[(String, String)]) -> Cost {
        let mut total = self.base.clone();
        for (key, value) in request {
            match self.arguments.get(key) {
                Some(argument) => total = total.merge(argument.price(value)),
                None => {
                    return total.merge(&Cost::stop(format!(
                        "request key '{}' is not on the white list of endpoint '{}'",
                        key, self.id
                    )));
                }
            }
        }
        total
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        check_finite(&self.base)
            .map_err(|e| anyhow::anyhow!("Endpoint '{}' base: {}", self.id, e))?;
        for (name, argument) in &self.arguments {
            check_finite(&argument.default).map_err(|e| {
                anyhow::anyhow!("Endpoint '{}' argument '{}' default: {}", self.id, name, e)
            })?;
            for rule in &argument.rules {
                rule.validate()
                    .and_then(|_| check_finite(rule.cost()))
                    .map_err(|e| {
                        anyhow::anyhow!("Endpoint '{}' argument '{}': {}", self.id, name, e)
                    })?;
            }
        }
        Ok(())
    }
}

/// Configured costs must stay comparable against quota limits
fn check_finite(cost: &Cost) -> anyhow::Result<()> {
    if !cost.base.is_finite() || !cost.multiplier.is_finite() || !cost.total().is_finite() {
        anyhow::bail!(
            "cost with base {} and multiplier {} is not finite",
            cost.base,
            cost.multiplier
        );
    }
    Ok(())
}

/// Rule-based calculator over a fixed set of endpoints
#[derive(Debug, Clone, Default)]
pub struct EndpointRules {
    endpoints: HashMap<String, Endpoint>,
}

impl EndpointRules {
    /// Build from `id -> endpoint`; each endpoint takes its id from the key
    pub fn new(endpoints: HashMap<String, Endpoint>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|(id, mut endpoint)| {
                endpoint.id = id.clone();
                (id, endpoint)
            })
            .collect();
        Self { endpoints }
    }
}

impl CostCalculator for EndpointRules {
    fn compute_cost(
        &self,
        endpoint_ids: &[String],
        request: &[(String, String)],
    ) -> ShieldResult<Cost> {
        if endpoint_ids.is_empty() {
            return Err(ShieldError::InvalidInput(
                "no endpoints given for the request".to_string(),
            ));
        }

        let mut total = Cost::NEUTRAL;
        for id in endpoint_ids {
            let endpoint = self
                .endpoints
                .get(id)
                .ok_or_else(|| ShieldError::UnknownEndpoint(id.clone()))?;
            total = total.merge(&endpoint.calculate_cost(request));
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn search_endpoint() -> Endpoint {
        let mut arguments = HashMap::new();
        arguments.insert(
            "rows".to_string(),
            Argument {
                default: Cost::go(1.0),
                rules: vec![
                    Rule::Integer {
                        min: None,
                        max: Some(100),
                        cost: Cost::go(1.0),
                    },
                    Rule::Integer {
                        min: Some(101),
                        max: Some(1000),
                        cost: Cost::go(20.0),
                    },
                    Rule::Any {
                        cost: Cost::stop("rows above 1000 are not allowed"),
                    },
                ],
            },
        );
        arguments.insert(
            "facet".to_string(),
            Argument {
                default: Cost::go(0.0),
                rules: vec![Rule::Values {
                    values: vec!["true".to_string()],
                    cost: Cost::with_multiplier(0.0, 2.0),
                }],
            },
        );
        arguments.insert("q".to_string(), Argument::default());
        Endpoint {
            id: "books".to_string(),
            base: Cost::go(5.0),
            arguments,
        }
    }

    fn rules() -> EndpointRules {
        let mut endpoints = HashMap::new();
        endpoints.insert("books".to_string(), search_endpoint());
        endpoints.insert(
            "images".to_string(),
            Endpoint {
                base: Cost::go(10.0),
                ..Default::default()
            },
        );
        EndpointRules::new(endpoints)
    }

    #[test]
    fn test_integer_rule_bounds() {
        let rule = Rule::Integer {
            min: Some(1),
            max: Some(10),
            cost: Cost::go(1.0),
        };
        assert!(rule.matches("1"));
        assert!(rule.matches(" 10 "));
        assert!(!rule.matches("0"));
        assert!(!rule.matches("11"));
        assert!(!rule.matches("ten"));
    }

    #[test]
    fn test_argument_first_match_wins() {
        let endpoint = search_endpoint();
        let rows = &endpoint.arguments["rows"];
        assert_eq!(rows.price("10").total(), 1.0);
        assert_eq!(rows.price("500").total(), 20.0);
        assert!(rows.price("5000").is_stop());
        assert!(rows.price("many").is_stop());
    }

    #[test]
    fn test_endpoint_cost_merges_parameters() {
        let cost = rules()
            .compute_cost(
                &["books".to_string()],
                &params(&[("q", "cats"), ("rows", "500"), ("facet", "true")]),
            )
            .unwrap();
        assert!(!cost.is_stop());
        assert_eq!(cost.base, 25.0);
        assert_eq!(cost.multiplier, 2.0);
        assert_eq!(cost.total(), 50.0);
    }

    #[test]
    fn test_unknown_parameter_stops() {
        let cost = rules()
            .compute_cost(&["books".to_string()], &params(&[("debug", "all")]))
            .unwrap();
        assert!(cost.is_stop());
        assert!(cost.message.unwrap().contains("'debug' is not on the white list"));
    }

    #[test]
    fn test_multiple_endpoints() {
        let cost = rules()
            .compute_cost(&["books".to_string(), "images".to_string()], &[])
            .unwrap();
        assert_eq!(cost.total(), 15.0);
    }

    #[test]
    fn test_unknown_endpoint() {
        let result = rules().compute_cost(&["videos".to_string()], &[]);
        assert_eq!(
            result,
            Err(ShieldError::UnknownEndpoint("videos".to_string()))
        );
    }

    #[test]
    fn test_no_endpoints_is_invalid() {
        let result = rules().compute_cost(&[], &[]);
        assert!(matches!(result, Err(ShieldError::InvalidInput(_))));
    }

    #[test]
    fn test_rule_validation() {
        let bad = Rule::Integer {
            min: Some(10),
            max: Some(1),
            cost: Cost::NEUTRAL,
        };
        assert!(bad.validate().is_err());

        let mut endpoint = search_endpoint();
        assert!(endpoint.validate().is_ok());
        endpoint.arguments.get_mut("rows").unwrap().rules.push(bad);
        assert!(endpoint.validate().is_err());
    }

    #[test]
    fn test_non_finite_costs_rejected() {
        let mut endpoint = search_endpoint();
        endpoint.base = Cost::with_multiplier(f64::INFINITY, 0.0);
        assert!(endpoint.validate().is_err());

        let mut endpoint = search_endpoint();
        endpoint.arguments.get_mut("q").unwrap().default = Cost::with_multiplier(1.0, f64::NAN);
        assert!(endpoint.validate().is_err());

        let mut endpoint = search_endpoint();
        endpoint.arguments.get_mut("rows").unwrap().rules.push(Rule::Any {
            cost: Cost::with_multiplier(f64::MAX, 10.0),
        });
        assert!(endpoint.validate().is_err());
    }

    #[test]
    fn test_rules_from_toml() {
        let endpoint: Endpoint = toml::from_str(
            r#"
base = { add = 2 }

[arguments.rows]
default = { add = 1 }
rules = [
    { type = "integer", max = 100, cost = { add = 1 } },
    { type = "values", values = ["-1"], cost = { action = "stop", message = "no unlimited rows" } },
]
"#,
        )
        .unwrap();
        let rows = &endpoint.arguments["rows"];
        assert_eq!(rows.rules.len(), 2);
        assert_eq!(rows.price("50").total(), 1.0);
        assert!(!rows.price("500").is_stop());
        // "-1" also matches the integer rule first
        assert!(!rows.price("-1").is_stop());
    }

    #[test]
    fn test_fixed_cost() {
        let calculator = FixedCost(Cost::go(42.0));
        let cost = calculator.compute_cost(&[], &[]).unwrap();
        assert_eq!(cost.total(), 42.0);
    }
}
