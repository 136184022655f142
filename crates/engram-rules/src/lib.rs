//! Engram Rule Interpreter
//!
//! A small declarative rule system evaluated against metadata
//! contexts:
//!
//! - **Rule model**: condition trees (AND/OR groups over typed field
//!   comparisons) paired with ordered actions
//! - **Field paths**: dot-path expressions plus reserved `$` tokens
//! - **Engine**: persisted rule set with priority-ordered evaluation,
//!   host functions, and a synchronous event bus

pub mod engine;
pub mod path;
pub mod registry;
pub mod rule;

pub use engine::{
    evaluate_nodes, rule_matches, FieldResolver, RuleEngine, RuleMatch, RULES_CATEGORY,
};
pub use path::{resolve_field, FieldPath};
pub use registry::{EventBus, EventListener, FunctionRegistry, RuleFunction};
pub use rule::{
    Action, ActionType, Condition, ConditionGroup, ConditionNode, ConditionOp, LogicalOp, Rule,
    StoredRule,
};
