//! Rule model
//!
//! Rules are declarative condition/action pairs evaluated against a
//! metadata context. The model is serde-serializable so rules persist
//! as JSON content of knowledge-tier records.

use engram_core::{Error, Result, Value};
use serde::{Deserialize, Serialize};

use crate::path::FieldPath;

/// Comparison operator for a leaf condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Equals,
    NotEquals,
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "lt")]
    LessThan,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
    NotExists,
}

impl ConditionOp {
    /// Operators that take no comparison value
    pub fn is_unary(&self) -> bool {
        matches!(self, ConditionOp::Exists | ConditionOp::NotExists)
    }
}

/// A single field comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field path or reserved token to resolve
    pub field: String,

    /// Comparison operator
    pub operator: ConditionOp,

    /// Comparison value (absent for unary operators)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Condition {
    /// Build a binary condition
    pub fn new<V: Into<Value>>(field: &str, operator: ConditionOp, value: V) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: Some(value.into()),
        }
    }

    /// Build a unary condition (exists / not_exists)
    pub fn unary(field: &str, operator: ConditionOp) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.field.is_empty() {
            return Err(Error::RuleValidation(
                "Condition is missing a field".to_string(),
            ));
        }
        if !self.field.starts_with('$') {
            FieldPath::parse(&self.field)?;
        }
        if !self.operator.is_unary() && self.value.is_none() {
            return Err(Error::RuleValidation(format!(
                "Condition on '{}' requires a comparison value",
                self.field
            )));
        }
        if self.operator == ConditionOp::Matches {
            let pattern = self
                .value
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::RuleValidation(format!(
                        "Matches condition on '{}' requires a string pattern",
                        self.field
                    ))
                })?;
            regex::Regex::new(pattern).map_err(|e| {
                Error::RuleValidation(format!("Invalid regex pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// How the conditions of a group combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    #[default]
    And,
    Or,
}

/// A group of conditions combined under one logical operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    /// Combining operator
    #[serde(default)]
    pub operator: LogicalOp,

    /// Member conditions, possibly nested groups
    pub conditions: Vec<ConditionNode>,
}

/// A node in the condition tree
///
/// Untagged: a leaf carries `field`, a group carries `conditions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Leaf(Condition),
    Group(ConditionGroup),
}

impl ConditionNode {
    /// Shorthand for an AND group
    pub fn all(conditions: Vec<ConditionNode>) -> Self {
        ConditionNode::Group(ConditionGroup {
            operator: LogicalOp::And,
            conditions,
        })
    }

    /// Shorthand for an OR group
    pub fn any(conditions: Vec<ConditionNode>) -> Self {
        ConditionNode::Group(ConditionGroup {
            operator: LogicalOp::Or,
            conditions,
        })
    }

    fn validate(&self) -> Result<()> {
        match self {
            ConditionNode::Leaf(condition) => condition.validate(),
            ConditionNode::Group(group) => {
                for node in &group.conditions {
                    node.validate()?;
                }
                Ok(())
            }
        }
    }
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        ConditionNode::Leaf(condition)
    }
}

/// What an action does when its rule matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SetValue,
    Increment,
    Decrement,
    Append,
    Remove,
    TriggerEvent,
    ExecuteFunction,
}

/// A single action of a matched rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// What to do
    #[serde(rename = "type")]
    pub action: ActionType,

    /// Field path, event name, or function name the action targets
    pub target: String,

    /// Action payload, interpretation depends on the action type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Action {
    /// Build an action
    pub fn new(action: ActionType, target: &str) -> Self {
        Self {
            action,
            target: target.to_string(),
            value: None,
        }
    }

    /// Attach a payload value
    pub fn with_value<V: Into<Value>>(mut self, value: V) -> Self {
        self.value = Some(value.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::RuleValidation(
                "Action is missing a target".to_string(),
            ));
        }
        match self.action {
            ActionType::SetValue | ActionType::Append => {
                if self.value.is_none() {
                    return Err(Error::RuleValidation(format!(
                        "{:?} action on '{}' requires a value",
                        self.action, self.target
                    )));
                }
                FieldPath::parse(&self.target)?;
            }
            ActionType::Increment | ActionType::Decrement | ActionType::Remove => {
                FieldPath::parse(&self.target)?;
            }
            ActionType::TriggerEvent | ActionType::ExecuteFunction => {}
        }
        Ok(())
    }
}

/// A declarative condition/action rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique name within the rule set
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Condition tree; an empty list matches every context
    #[serde(default)]
    pub conditions: Vec<ConditionNode>,

    /// Actions applied in order when conditions match
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Evaluation priority, higher first
    #[serde(default)]
    pub priority: i32,

    /// Inactive rules are skipped during evaluation
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Rule {
    /// Create an active rule with default priority
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            priority: 0,
            active: true,
        }
    }

    /// Add a condition node
    pub fn condition<C: Into<ConditionNode>>(mut self, condition: C) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// Add an action
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the description
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Validate the rule shape before it is stored
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::RuleValidation("Rule is missing a name".to_string()));
        }
        for node in &self.conditions {
            node.validate()?;
        }
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}

/// A rule together with the id of the record it is stored in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRule {
    /// Id of the backing knowledge record
    pub id: engram_core::RecordId,

    /// The rule itself
    pub rule: Rule,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_validation_requires_name() {
        let rule = Rule::new("");
        assert!(rule.validate().unwrap_err().to_string().contains("name"));
    }

    #[test]
    fn test_condition_requires_value_for_binary_ops() {
        let rule = Rule::new("r").condition(Condition {
            field: "temp".to_string(),
            operator: ConditionOp::GreaterThan,
            value: None,
        });
        assert!(rule.validate().is_err());

        let unary = Rule::new("r").condition(Condition::unary("temp", ConditionOp::Exists));
        assert!(unary.validate().is_ok());
    }

    #[test]
    fn test_matches_pattern_checked_up_front() {
        let bad = Rule::new("r").condition(Condition::new("name", ConditionOp::Matches, "[unclosed"));
        assert!(bad.validate().is_err());

        let good = Rule::new("r").condition(Condition::new("name", ConditionOp::Matches, "^a.*z$"));
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_action_validation() {
        let no_target = Rule::new("r").action(Action::new(ActionType::SetValue, ""));
        assert!(no_target.validate().is_err());

        let no_value = Rule::new("r").action(Action::new(ActionType::SetValue, "alert"));
        assert!(no_value.validate().is_err());

        let ok = Rule::new("r").action(Action::new(ActionType::SetValue, "alert").with_value(true));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_serde_roundtrip_with_nested_groups() {
        let rule = Rule::new("high-temp")
            .describe("alert when hot or humid")
            .condition(ConditionNode::any(vec![
                Condition::new("temp", ConditionOp::GreaterThan, 30i64).into(),
                Condition::new("humidity", ConditionOp::GreaterThan, 90i64).into(),
            ]))
            .action(Action::new(ActionType::SetValue, "alert").with_value(true))
            .with_priority(10);

        let json = serde_json::to_string(&rule).unwrap();
        let back: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
        assert!(back.active);
    }

    #[test]
    fn test_wire_format_operator_and_action_names() {
        let json = serde_json::json!({
            "name": "high-temp",
            "conditions": [
                { "field": "temp", "operator": "gt", "value": 30 }
            ],
            "actions": [
                { "type": "set_value", "target": "alert", "value": true }
            ]
        });

        let rule: Rule = serde_json::from_value(json).unwrap();
        assert!(rule.validate().is_ok());
        match &rule.conditions[0] {
            ConditionNode::Leaf(c) => assert_eq!(c.operator, ConditionOp::GreaterThan),
            other => panic!("expected a leaf condition, got {:?}", other),
        }
        assert_eq!(rule.actions[0].action, ActionType::SetValue);

        // And back out: the short operator names and the `type` key
        // are what we emit, too
        let emitted = serde_json::to_value(&rule).unwrap();
        assert_eq!(emitted["conditions"][0]["operator"], "gt");
        assert_eq!(emitted["actions"][0]["type"], "set_value");

        let lt: ConditionOp = serde_json::from_value(serde_json::json!("lt")).unwrap();
        assert_eq!(lt, ConditionOp::LessThan);
    }

    #[test]
    fn test_untagged_nodes_deserialize_by_shape() {
        let json = serde_json::json!([
            { "field": "temp", "operator": "gt", "value": 30 },
            {
                "operator": "or",
                "conditions": [
                    { "field": "mode", "operator": "equals", "value": "auto" }
                ]
            }
        ]);

        let nodes: Vec<ConditionNode> = serde_json::from_value(json).unwrap();
        assert!(matches!(nodes[0], ConditionNode::Leaf(_)));
        assert!(matches!(nodes[1], ConditionNode::Group(_)));
    }
}
