//! Rule evaluation engine
//!
//! Conditions are evaluated against a metadata context with
//! short-circuit logical combination; matched rules apply their
//! actions to the same context in priority order, so earlier rules
//! can enable or suppress later ones within a single pass.
//!
//! Rules persist as JSON content of knowledge-tier records, so they
//! survive restarts alongside ordinary memories.

use engram_core::{
    meta, Error, MemoryRecordBuilder, MemoryType, Metadata, RecordId, Result, Tier, Value,
};
use engram_store::{Filter, RecordStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::path::{resolve_field, FieldPath};
use crate::registry::{EventBus, FunctionRegistry};
use crate::rule::{
    Action, ActionType, Condition, ConditionNode, ConditionOp, LogicalOp, Rule, StoredRule,
};

/// Metadata keys on rule-backing records
mod rule_meta {
    pub const NAME: &str = "rule_name";
    pub const PRIORITY: &str = "rule_priority";
    pub const ACTIVE: &str = "rule_active";
}

/// Category tag carried by rule-backing records
pub const RULES_CATEGORY: &str = "rules";

// ========== Condition evaluation ==========

/// A field resolver used during condition evaluation
///
/// Taking the resolver as a closure keeps evaluation testable and lets
/// callers observe which fields a pass actually touches.
pub type FieldResolver<'a> = dyn FnMut(&str) -> Result<Option<Value>> + 'a;

/// Evaluate a condition list (implicit AND) with short-circuiting
///
/// An empty list matches every context. Fields are resolved lazily, so
/// a failed conjunct stops resolution of the ones after it.
pub fn evaluate_nodes(nodes: &[ConditionNode], resolver: &mut FieldResolver<'_>) -> Result<bool> {
    for node in nodes {
        if !evaluate_node(node, resolver)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_node(node: &ConditionNode, resolver: &mut FieldResolver<'_>) -> Result<bool> {
    match node {
        ConditionNode::Leaf(condition) => evaluate_leaf(condition, resolver),
        ConditionNode::Group(group) => match group.operator {
            LogicalOp::And => evaluate_nodes(&group.conditions, resolver),
            LogicalOp::Or => {
                for member in &group.conditions {
                    if evaluate_node(member, resolver)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        },
    }
}

fn evaluate_leaf(condition: &Condition, resolver: &mut FieldResolver<'_>) -> Result<bool> {
    let resolved = resolver(&condition.field)?;

    match condition.operator {
        ConditionOp::Exists => return Ok(matches!(&resolved, Some(v) if !v.is_null())),
        ConditionOp::NotExists => return Ok(!matches!(&resolved, Some(v) if !v.is_null())),
        _ => {}
    }

    // A missing field fails every comparison
    let Some(actual) = resolved else {
        return Ok(false);
    };
    let expected = condition.value.as_ref().ok_or_else(|| {
        Error::RuleEvaluation(format!(
            "Condition on '{}' has no comparison value",
            condition.field
        ))
    })?;

    match condition.operator {
        ConditionOp::Equals => Ok(values_equal(&actual, expected)),
        ConditionOp::NotEquals => Ok(!values_equal(&actual, expected)),
        ConditionOp::GreaterThan => Ok(compare_order(&actual, expected)
            .map(std::cmp::Ordering::is_gt)
            .unwrap_or(false)),
        ConditionOp::LessThan => Ok(compare_order(&actual, expected)
            .map(std::cmp::Ordering::is_lt)
            .unwrap_or(false)),
        ConditionOp::Contains => Ok(value_contains(&actual, expected)),
        ConditionOp::NotContains => Ok(!value_contains(&actual, expected)),
        ConditionOp::StartsWith => Ok(both_strings(&actual, expected)
            .map(|(a, e)| a.starts_with(e))
            .unwrap_or(false)),
        ConditionOp::EndsWith => Ok(both_strings(&actual, expected)
            .map(|(a, e)| a.ends_with(e))
            .unwrap_or(false)),
        ConditionOp::Matches => {
            let pattern = expected.as_str().ok_or_else(|| {
                Error::RuleEvaluation(format!(
                    "Matches condition on '{}' requires a string pattern",
                    condition.field
                ))
            })?;
            let regex = regex::Regex::new(pattern).map_err(|e| {
                Error::RuleEvaluation(format!("Invalid regex pattern '{}': {}", pattern, e))
            })?;
            Ok(actual.as_str().map(|s| regex.is_match(s)).unwrap_or(false))
        }
        ConditionOp::Exists | ConditionOp::NotExists => unreachable!("handled above"),
    }
}

/// Equality with numeric coercion (Int 3 equals Float 3.0)
fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    a == b
}

/// Ordering for comparable values: numbers numerically, strings
/// lexicographically, anything else incomparable
fn compare_order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let Some((x, y)) = both_strings(a, b) {
        return Some(x.cmp(y));
    }
    None
}

/// Containment: substring for strings, membership for arrays
fn value_contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Array(arr) => arr.iter().any(|v| values_equal(v, needle)),
        _ => false,
    }
}

fn both_strings<'a>(a: &'a Value, b: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((a.as_str()?, b.as_str()?))
}

/// Evaluate a rule's conditions against a context
pub fn rule_matches(rule: &Rule, context: &Metadata) -> Result<bool> {
    evaluate_nodes(&rule.conditions, &mut |field| resolve_field(context, field))
}

// ========== Rule engine ==========

/// The result of one matched rule within an evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    /// Name of the matched rule
    pub rule_name: String,

    /// Number of actions applied
    pub actions_applied: usize,
}

/// Engine owning the persisted rule set, host functions, and events
pub struct RuleEngine {
    store: Arc<dyn RecordStore>,
    functions: RwLock<FunctionRegistry>,
    events: RwLock<EventBus>,
}

impl RuleEngine {
    /// Create an engine over a backing store
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            functions: RwLock::new(FunctionRegistry::new()),
            events: RwLock::new(EventBus::new()),
        }
    }

    /// Register a host function callable from `execute_function` actions
    pub fn register_function<F>(&self, name: &str, function: F) -> Result<()>
    where
        F: Fn(&mut Metadata, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions
            .write()
            .map_err(|_| Error::Internal("Function registry lock poisoned".to_string()))?
            .register(name, function)
    }

    /// Subscribe a listener to `trigger_event` actions
    pub fn subscribe<F>(&self, event: &str, listener: F) -> Result<()>
    where
        F: Fn(&str, &Metadata) -> Result<()> + Send + Sync + 'static,
    {
        self.events
            .write()
            .map_err(|_| Error::Internal("Event bus lock poisoned".to_string()))?
            .subscribe(event, listener);
        Ok(())
    }

    // ========== Persistence ==========

    /// Create and persist a rule, rejecting duplicate names
    pub async fn create_rule(&self, rule: Rule) -> Result<StoredRule> {
        rule.validate()?;
        self.validate_function_targets(&rule)?;

        if self.find_rule_record(&rule.name).await?.is_some() {
            return Err(Error::RuleValidation(format!(
                "Rule already exists: {}",
                rule.name
            )));
        }

        let content = serde_json::to_string(&rule)
            .map_err(|e| Error::Serialization(format!("Failed to serialize rule: {}", e)))?;
        let record = MemoryRecordBuilder::new(Tier::Knowledge, MemoryType::Rule, &content)
            .metadata(rule_meta::NAME, rule.name.as_str())
            .metadata(rule_meta::PRIORITY, i64::from(rule.priority))
            .metadata(rule_meta::ACTIVE, rule.active)
            .metadata(meta::CATEGORIES, vec![RULES_CATEGORY])
            .build()?;

        self.store.put(&record).await?;
        info!("Created rule {} (priority {})", rule.name, rule.priority);

        Ok(StoredRule {
            id: record.id,
            rule,
        })
    }

    /// Get a rule by name
    pub async fn get_rule(&self, name: &str) -> Result<StoredRule> {
        let record = self
            .find_rule_record(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Rule not found: {}", name)))?;
        Self::decode_rule(&record.id, &record.content)
    }

    /// Replace a stored rule, matched by name
    pub async fn update_rule(&self, rule: Rule) -> Result<StoredRule> {
        rule.validate()?;
        self.validate_function_targets(&rule)?;

        let mut record = self
            .find_rule_record(&rule.name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Rule not found: {}", rule.name)))?;

        record.content = serde_json::to_string(&rule)
            .map_err(|e| Error::Serialization(format!("Failed to serialize rule: {}", e)))?;
        record
            .metadata
            .set(rule_meta::PRIORITY, i64::from(rule.priority));
        record.metadata.set(rule_meta::ACTIVE, rule.active);
        record.touch();

        self.store.put(&record).await?;
        debug!("Updated rule {}", rule.name);

        Ok(StoredRule {
            id: record.id,
            rule,
        })
    }

    /// Activate or deactivate a rule without replacing it
    pub async fn set_rule_active(&self, name: &str, active: bool) -> Result<()> {
        let stored = self.get_rule(name).await?;
        let mut rule = stored.rule;
        rule.active = active;
        self.update_rule(rule).await?;
        Ok(())
    }

    /// Delete a rule by name, returning whether it existed
    pub async fn delete_rule(&self, name: &str) -> Result<bool> {
        match self.find_rule_record(name).await? {
            Some(record) => {
                self.store.delete(&record.id).await?;
                info!("Deleted rule {}", name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All stored rules, highest priority first
    pub async fn get_all_rules(&self) -> Result<Vec<StoredRule>> {
        let records = self
            .store
            .query(&Filter::new().memory_type(MemoryType::Rule))
            .await?;

        let mut rules = Vec::with_capacity(records.len());
        for record in records {
            match Self::decode_rule(&record.id, &record.content) {
                Ok(stored) => rules.push(stored),
                // A corrupt rule record must not take down the pass
                Err(e) => warn!("Skipping undecodable rule record {}: {}", record.id, e),
            }
        }
        rules.sort_by(|a, b| {
            b.rule
                .priority
                .cmp(&a.rule.priority)
                .then_with(|| a.rule.name.cmp(&b.rule.name))
        });
        Ok(rules)
    }

    /// Active rules only, highest priority first
    pub async fn get_active_rules(&self) -> Result<Vec<StoredRule>> {
        let mut rules = self.get_all_rules().await?;
        rules.retain(|s| s.rule.active);
        Ok(rules)
    }

    // ========== Evaluation ==========

    /// Evaluate every active rule against a context
    ///
    /// Rules run in priority order against the same mutable context,
    /// so one rule's actions are visible to the rules after it.
    /// Function-execution failures abort the pass; event listener
    /// failures do not.
    pub async fn evaluate_rules(&self, context: &mut Metadata) -> Result<Vec<RuleMatch>> {
        let rules = self.get_active_rules().await?;
        let mut matches = Vec::new();

        for stored in &rules {
            let rule = &stored.rule;
            if !rule_matches(rule, context)? {
                continue;
            }
            debug!("Rule {} matched", rule.name);

            let mut applied = 0;
            for action in &rule.actions {
                self.apply_action(action, context)?;
                applied += 1;
            }
            matches.push(RuleMatch {
                rule_name: rule.name.clone(),
                actions_applied: applied,
            });
        }

        debug!("Rule pass matched {} of {} rules", matches.len(), rules.len());
        Ok(matches)
    }

    fn apply_action(&self, action: &Action, context: &mut Metadata) -> Result<()> {
        match action.action {
            ActionType::SetValue => {
                let value = self.resolve_payload(context, action)?;
                FieldPath::parse(&action.target)?.set(context, value);
            }
            ActionType::Increment => Self::adjust(context, &action.target, action, 1.0)?,
            ActionType::Decrement => Self::adjust(context, &action.target, action, -1.0)?,
            ActionType::Append => {
                let value = self.resolve_payload(context, action)?;
                let path = FieldPath::parse(&action.target)?;
                let appended = match path.remove(context) {
                    Some(Value::Array(mut arr)) => {
                        arr.push(value);
                        Value::Array(arr)
                    }
                    Some(prev) => Value::Array(vec![prev, value]),
                    None => Value::Array(vec![value]),
                };
                path.set(context, appended);
            }
            ActionType::Remove => {
                FieldPath::parse(&action.target)?.remove(context);
            }
            ActionType::TriggerEvent => {
                let events = self
                    .events
                    .read()
                    .map_err(|_| Error::Internal("Event bus lock poisoned".to_string()))?;
                events.emit(&action.target, context);
            }
            ActionType::ExecuteFunction => {
                let functions = self
                    .functions
                    .read()
                    .map_err(|_| Error::Internal("Function registry lock poisoned".to_string()))?;
                functions.call(&action.target, context, action.value.as_ref())?;
            }
        }
        Ok(())
    }

    /// Numeric adjustment for increment/decrement
    ///
    /// A missing or non-numeric target counts as zero; the default
    /// step is 1.
    fn adjust(context: &mut Metadata, target: &str, action: &Action, sign: f64) -> Result<()> {
        let path = FieldPath::parse(target)?;
        let step = action
            .value
            .as_ref()
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let current = path.resolve(context).and_then(Value::as_f64).unwrap_or(0.0);
        let next = current + sign * step;

        // Preserve integer typing when both sides are integral
        let integral = action
            .value
            .as_ref()
            .map(|v| matches!(v, Value::Int(_)))
            .unwrap_or(true)
            && !matches!(path.resolve(context), Some(Value::Float(_)));
        if integral && next.fract() == 0.0 {
            path.set(context, Value::Int(next as i64));
        } else {
            path.set(context, Value::Float(next));
        }
        Ok(())
    }

    /// Resolve an action payload, expanding `$`-token strings
    fn resolve_payload(&self, context: &Metadata, action: &Action) -> Result<Value> {
        let value = action.value.clone().ok_or_else(|| {
            Error::RuleEvaluation(format!(
                "Action on '{}' is missing a value",
                action.target
            ))
        })?;
        if let Some(token) = value.as_str() {
            if token.starts_with('$') {
                return Ok(resolve_field(context, token)?.unwrap_or(Value::Null));
            }
        }
        Ok(value)
    }

    /// Reject rules targeting unregistered functions at write time
    fn validate_function_targets(&self, rule: &Rule) -> Result<()> {
        let functions = self
            .functions
            .read()
            .map_err(|_| Error::Internal("Function registry lock poisoned".to_string()))?;
        for action in &rule.actions {
            if action.action == ActionType::ExecuteFunction && !functions.contains(&action.target) {
                return Err(Error::UnknownFunction(action.target.clone()));
            }
        }
        Ok(())
    }

    async fn find_rule_record(&self, name: &str) -> Result<Option<engram_core::MemoryRecord>> {
        let filter = Filter::new()
            .memory_type(MemoryType::Rule)
            .meta_eq(rule_meta::NAME, name)
            .limit(1);
        Ok(self.store.query(&filter).await?.into_iter().next())
    }

    fn decode_rule(id: &RecordId, content: &str) -> Result<StoredRule> {
        let rule: Rule = serde_json::from_str(content)
            .map_err(|e| Error::Deserialization(format!("Failed to decode rule: {}", e)))?;
        Ok(StoredRule {
            id: id.clone(),
            rule,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ConditionGroup;
    use engram_store::InMemoryStore;

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(InMemoryStore::new()))
    }

    fn ctx(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_empty_conditions_match_everything() {
        let context = Metadata::new();
        let mut resolver = |field: &str| resolve_field(&context, field);
        assert!(evaluate_nodes(&[], &mut resolver).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let context = ctx(&[
            ("temp", Value::Int(35)),
            ("name", Value::from("alice")),
            ("tags", Value::from(vec!["a", "b"])),
        ]);

        let check = |cond: Condition| {
            rule_matches(&Rule::new("t").condition(cond), &context).unwrap()
        };

        assert!(check(Condition::new("temp", ConditionOp::GreaterThan, 30i64)));
        assert!(!check(Condition::new("temp", ConditionOp::LessThan, 30i64)));
        assert!(check(Condition::new("temp", ConditionOp::Equals, 35.0)));
        assert!(check(Condition::new("name", ConditionOp::StartsWith, "al")));
        assert!(check(Condition::new("name", ConditionOp::EndsWith, "ce")));
        assert!(check(Condition::new("name", ConditionOp::Contains, "lic")));
        assert!(check(Condition::new("tags", ConditionOp::Contains, "b")));
        assert!(check(Condition::new("tags", ConditionOp::NotContains, "z")));
        assert!(check(Condition::new("name", ConditionOp::Matches, "^a.*e$")));
        assert!(check(Condition::unary("temp", ConditionOp::Exists)));
        assert!(check(Condition::unary("missing", ConditionOp::NotExists)));
    }

    #[test]
    fn test_missing_field_fails_comparisons() {
        let context = Metadata::new();
        let rule = Rule::new("t").condition(Condition::new(
            "absent",
            ConditionOp::NotEquals,
            "anything",
        ));
        assert!(!rule_matches(&rule, &context).unwrap());
    }

    #[test]
    fn test_nested_or_group() {
        let rule = Rule::new("hot-or-humid").condition(ConditionNode::any(vec![
            Condition::new("temp", ConditionOp::GreaterThan, 30i64).into(),
            Condition::new("humidity", ConditionOp::GreaterThan, 90i64).into(),
        ]));

        let humid = ctx(&[("temp", Value::Int(20)), ("humidity", Value::Int(95))]);
        assert!(rule_matches(&rule, &humid).unwrap());

        let mild = ctx(&[("temp", Value::Int(20)), ("humidity", Value::Int(40))]);
        assert!(!rule_matches(&rule, &mild).unwrap());
    }

    #[test]
    fn test_and_short_circuits_field_resolution() {
        let nodes = vec![
            Condition::new("a", ConditionOp::Equals, 1i64).into(),
            Condition::new("b", ConditionOp::Equals, 2i64).into(),
            Condition::new("c", ConditionOp::Equals, 3i64).into(),
        ];

        // "a" fails, so "b" and "c" must never be resolved
        let context = ctx(&[("a", Value::Int(99))]);
        let mut resolved = Vec::new();
        let mut resolver = |field: &str| {
            resolved.push(field.to_string());
            resolve_field(&context, field)
        };

        assert!(!evaluate_nodes(&nodes, &mut resolver).unwrap());
        assert_eq!(resolved, vec!["a"]);
    }

    #[test]
    fn test_or_short_circuits_on_first_hit() {
        let group = ConditionNode::Group(ConditionGroup {
            operator: LogicalOp::Or,
            conditions: vec![
                Condition::new("x", ConditionOp::Equals, 1i64).into(),
                Condition::new("y", ConditionOp::Equals, 2i64).into(),
            ],
        });

        let context = ctx(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let mut resolved = Vec::new();
        let mut resolver = |field: &str| {
            resolved.push(field.to_string());
            resolve_field(&context, field)
        };

        assert!(evaluate_nodes(&[group], &mut resolver).unwrap());
        assert_eq!(resolved, vec!["x"]);
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let engine = engine();

        let rule = Rule::new("greet")
            .condition(Condition::new("event", ConditionOp::Equals, "hello"))
            .action(Action::new(ActionType::SetValue, "greeted").with_value(true));

        let stored = engine.create_rule(rule.clone()).await.unwrap();
        assert_eq!(stored.id.tier(), Tier::Knowledge);

        // Duplicate names rejected
        assert!(engine.create_rule(rule.clone()).await.is_err());

        let fetched = engine.get_rule("greet").await.unwrap();
        assert_eq!(fetched.rule, rule);

        let mut updated = rule.clone();
        updated.priority = 5;
        engine.update_rule(updated).await.unwrap();
        assert_eq!(engine.get_rule("greet").await.unwrap().rule.priority, 5);

        assert!(engine.delete_rule("greet").await.unwrap());
        assert!(!engine.delete_rule("greet").await.unwrap());
        assert!(engine.get_rule("greet").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected_on_create() {
        let engine = engine();
        let bad = Rule::new("bad").condition(Condition {
            field: "x".to_string(),
            operator: ConditionOp::Equals,
            value: None,
        });
        assert!(engine.create_rule(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_priority_ordering_and_active_filter() {
        let engine = engine();
        engine
            .create_rule(Rule::new("low").with_priority(1))
            .await
            .unwrap();
        engine
            .create_rule(Rule::new("high").with_priority(10))
            .await
            .unwrap();
        let mut off = Rule::new("off").with_priority(100);
        off.active = false;
        engine.create_rule(off).await.unwrap();

        let all = engine.get_all_rules().await.unwrap();
        let names: Vec<&str> = all.iter().map(|s| s.rule.name.as_str()).collect();
        assert_eq!(names, vec!["off", "high", "low"]);

        let active = engine.get_active_rules().await.unwrap();
        let names: Vec<&str> = active.iter().map(|s| s.rule.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_temperature_alert_scenario() {
        let engine = engine();
        engine
            .create_rule(
                Rule::new("high-temp")
                    .condition(Condition::new("temp", ConditionOp::GreaterThan, 30i64))
                    .action(Action::new(ActionType::SetValue, "alert").with_value(true))
                    .action(Action::new(ActionType::Increment, "alert_count")),
            )
            .await
            .unwrap();

        let mut hot = Metadata::with("temp", 35i64);
        let matches = engine.evaluate_rules(&mut hot).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_name, "high-temp");
        assert_eq!(hot.get_bool("alert"), Some(true));
        assert_eq!(hot.get_i64("alert_count"), Some(1));

        let mut cool = Metadata::with("temp", 20i64);
        let matches = engine.evaluate_rules(&mut cool).await.unwrap();
        assert!(matches.is_empty());
        assert!(cool.get("alert").is_none());
    }

    #[tokio::test]
    async fn test_earlier_rule_feeds_later_rule() {
        let engine = engine();
        engine
            .create_rule(
                Rule::new("first")
                    .with_priority(10)
                    .action(Action::new(ActionType::SetValue, "stage").with_value("prepared")),
            )
            .await
            .unwrap();
        engine
            .create_rule(
                Rule::new("second")
                    .with_priority(1)
                    .condition(Condition::new("stage", ConditionOp::Equals, "prepared"))
                    .action(Action::new(ActionType::SetValue, "done").with_value(true)),
            )
            .await
            .unwrap();

        let mut context = Metadata::new();
        let matches = engine.evaluate_rules(&mut context).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(context.get_bool("done"), Some(true));
    }

    #[tokio::test]
    async fn test_append_and_remove_actions() {
        let engine = engine();
        engine
            .create_rule(
                Rule::new("collect")
                    .action(Action::new(ActionType::Append, "seen").with_value("x"))
                    .action(Action::new(ActionType::Remove, "scratch")),
            )
            .await
            .unwrap();

        let mut context = Metadata::with("scratch", 1i64);
        engine.evaluate_rules(&mut context).await.unwrap();
        engine.evaluate_rules(&mut context).await.unwrap();

        let seen = context.get("seen").and_then(Value::as_array).unwrap();
        assert_eq!(seen.len(), 2);
        assert!(context.get("scratch").is_none());
    }

    #[tokio::test]
    async fn test_execute_function_failure_aborts_pass() {
        let engine = engine();
        engine
            .register_function("explode", |_, _| {
                Err(Error::Internal("function broke".to_string()))
            })
            .unwrap();
        engine
            .create_rule(
                Rule::new("boom").action(Action::new(ActionType::ExecuteFunction, "explode")),
            )
            .await
            .unwrap();

        let mut context = Metadata::new();
        assert!(engine.evaluate_rules(&mut context).await.is_err());
    }

    #[tokio::test]
    async fn test_unregistered_function_rejected_at_create() {
        let engine = engine();
        let rule =
            Rule::new("calls").action(Action::new(ActionType::ExecuteFunction, "not_there"));
        let err = engine.create_rule(rule).await.unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));
    }

    #[tokio::test]
    async fn test_trigger_event_reaches_listeners() {
        let engine = engine();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        engine
            .subscribe("notify", move |_, _| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        engine
            .create_rule(Rule::new("pinger").action(Action::new(ActionType::TriggerEvent, "notify")))
            .await
            .unwrap();

        let mut context = Metadata::new();
        engine.evaluate_rules(&mut context).await.unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_payload_resolved_at_apply_time() {
        let engine = engine();
        engine
            .create_rule(
                Rule::new("stamp")
                    .action(Action::new(ActionType::SetValue, "stamped_at").with_value("$timestamp")),
            )
            .await
            .unwrap();

        let mut context = Metadata::new();
        engine.evaluate_rules(&mut context).await.unwrap();
        assert!(context.get_i64("stamped_at").is_some());
    }

    #[tokio::test]
    async fn test_set_rule_active() {
        let engine = engine();
        engine.create_rule(Rule::new("toggle")).await.unwrap();

        engine.set_rule_active("toggle", false).await.unwrap();
        assert!(engine.get_active_rules().await.unwrap().is_empty());

        engine.set_rule_active("toggle", true).await.unwrap();
        assert_eq!(engine.get_active_rules().await.unwrap().len(), 1);
    }
}
