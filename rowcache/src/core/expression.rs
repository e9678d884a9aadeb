//! Expression trees for filter/selector based fetches
//!
//! The query translator builds these trees from caller predicates; the cache
//! only walks them to derive fingerprints and keeps them so an expired entry
//! can be re-issued without the caller supplying the predicate again.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared handle to an expression tree carried by cache envelopes
pub type ExpressionHandle = Arc<Expression>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    Convert,
    Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Coalesce,
}

/// Literal value embedded in an expression
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl ConstantValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
        }
    }
}

/// Node of a filter or selector expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Constant(ConstantValue),
    MemberAccess {
        member: String,
        target: Option<Box<Expression>>,
    },
    Call {
        method: String,
        target: Option<Box<Expression>>,
        arguments: Vec<Expression>,
    },
    Lambda {
        body: Box<Expression>,
        parameters: Vec<String>,
    },
    Parameter {
        name: String,
    },
    /// Constructed value such as a date literal built from its parts
    Construct {
        type_name: String,
        arguments: Vec<Expression>,
        value: Option<ConstantValue>,
    },
    /// Provider-specific node the cache cannot fingerprint
    Extension {
        kind: String,
    },
}

impl Expression {
    /// Stable node-kind code mixed into fingerprints before any children
    pub fn kind_code(&self) -> u64 {
        match self {
            Self::Unary { op, .. } => 0x100 + *op as u64,
            Self::Binary { op, .. } => 0x200 + *op as u64,
            Self::Constant(_) => 0x300,
            Self::MemberAccess { .. } => 0x400,
            Self::Call { .. } => 0x500,
            Self::Lambda { .. } => 0x600,
            Self::Parameter { .. } => 0x700,
            Self::Construct { .. } => 0x800,
            Self::Extension { .. } => 0xF00,
        }
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter { name: name.into() }
    }

    pub fn constant(value: ConstantValue) -> Self {
        Self::Constant(value)
    }

    pub fn member(target: Expression, member: impl Into<String>) -> Self {
        Self::MemberAccess {
            member: member.into(),
            target: Some(Box::new(target)),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(target: Option<Expression>, method: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Self::Call {
            method: method.into(),
            target: target.map(Box::new),
            arguments,
        }
    }

    pub fn lambda(body: Expression, parameters: &[&str]) -> Self {
        Self::Lambda {
            body: Box::new(body),
            parameters: parameters.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    pub fn into_handle(self) -> ExpressionHandle {
        Arc::new(self)
    }
}
