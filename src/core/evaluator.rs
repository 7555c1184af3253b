//! Condition and instruction evaluation against a `StoreView`.
//!
//! Conditions are read-only. Instructions stage every write in a local
//! overlay and apply it to the view only after the whole script succeeded,
//! so a failing instruction leaves the view exactly as it was.

use tracing::info;

use crate::core::script::{self, BinaryOp, Expr, Script, ScriptError, Stmt, UnaryOp};
use crate::core::state::ScriptRng;
use crate::core::store::StoreView;
use crate::schema::node::NodeId;
use crate::schema::variable::{GvName, Value};

/// Function names the evaluator understands.
pub const BUILTINS: &[&str] = &[
    "random",
    "getSeenCounter",
    "setSeenCounter",
    "resetAllSeenCounters",
    "isInRange",
    "getProp",
    "setProp",
    "print",
];

/// Parse and evaluate condition text. Empty text is `true`.
pub fn evaluate_condition(text: &str, view: &dyn StoreView) -> Result<bool, ScriptError> {
    condition_value(&script::parse(text)?, view)
}

/// Evaluate an already parsed condition.
pub fn condition_value(script: &Script, view: &dyn StoreView) -> Result<bool, ScriptError> {
    let expr = match script.statements.as_slice() {
        [] => return Ok(true),
        [Stmt::Expr(expr)] => expr,
        [Stmt::Assign { .. }] => return Err(ScriptError::NotAllowed("assignment".to_string())),
        many => return Err(ScriptError::NotBoolean(format!("{} statements", many.len()))),
    };
    check_declared(script, view)?;
    let mut ctx = Context::new(view, false);
    match ctx.eval(expr)? {
        Value::Bool(b) => Ok(b),
        other => Err(ScriptError::NotBoolean(other.kind().to_string())),
    }
}

/// Parse and run instruction text against `view`.
pub fn execute_instruction(text: &str, view: &mut dyn StoreView) -> Result<(), ScriptError> {
    run_instruction(&script::parse(text)?, view)
}

/// Run an already parsed instruction. All-or-nothing.
pub fn run_instruction(script: &Script, view: &mut dyn StoreView) -> Result<(), ScriptError> {
    if script.is_empty() {
        return Ok(());
    }
    check_declared(script, &*view)?;
    let staged = {
        let mut ctx = Context::new(&*view, true);
        for stmt in &script.statements {
            ctx.statement(stmt)?;
        }
        ctx.into_staged()
    };
    staged.apply(view)
}

/// Variables referenced by `script` that `view` does not declare.
pub fn undeclared_variables(script: &Script, view: &dyn StoreView) -> Vec<GvName> {
    let mut missing: Vec<GvName> = Vec::new();
    for name in script.variables() {
        if view.value(&name).is_err() && !missing.contains(&name) {
            missing.push(name);
        }
    }
    missing
}

/// Every referenced variable must resolve, including ones behind a
/// short-circuited operand.
fn check_declared(script: &Script, view: &dyn StoreView) -> Result<(), ScriptError> {
    match undeclared_variables(script, view).into_iter().next() {
        Some(name) => Err(ScriptError::UndeclaredVariable(name)),
        None => Ok(()),
    }
}

/// Functions called by `script` that are not builtins.
pub fn unknown_functions(script: &Script) -> Vec<String> {
    fn walk(expr: &Expr, out: &mut Vec<String>) {
        match expr {
            Expr::Literal(_) | Expr::Variable(_) => {}
            Expr::Unary { operand, .. } => walk(operand, out),
            Expr::Binary { lhs, rhs, .. } => {
                walk(lhs, out);
                walk(rhs, out);
            }
            Expr::Call { name, args } => {
                if !BUILTINS.contains(&name.as_str()) && !out.contains(name) {
                    out.push(name.clone());
                }
                args.iter().for_each(|arg| walk(arg, out));
            }
        }
    }

    let mut out = Vec::new();
    for stmt in &script.statements {
        match stmt {
            Stmt::Assign { value, .. } => walk(value, &mut out),
            Stmt::Expr(expr) => walk(expr, &mut out),
        }
    }
    out
}

/// Writes produced by an instruction, not yet applied.
#[derive(Default)]
struct Staged {
    values: Vec<(GvName, Value)>,
    seen: Vec<(NodeId, u32)>,
    props: Vec<(NodeId, String, Value)>,
    reset_seen: bool,
    rng: Option<ScriptRng>,
}

impl Staged {
    fn apply(self, view: &mut dyn StoreView) -> Result<(), ScriptError> {
        for (name, value) in self.values {
            view.set_value(&name, value)?;
        }
        for (node, property, value) in self.props {
            view.set_node_property(node, &property, value)?;
        }
        if self.reset_seen {
            view.reset_seen_counters();
        }
        for (node, count) in self.seen {
            view.set_seen_counter(node, count);
        }
        if let Some(rng) = self.rng {
            view.replace_rng(rng);
        }
        Ok(())
    }
}

struct Context<'a> {
    view: &'a dyn StoreView,
    mutable: bool,
    staged: Staged,
}

impl<'a> Context<'a> {
    fn new(view: &'a dyn StoreView, mutable: bool) -> Self {
        Self {
            view,
            mutable,
            staged: Staged::default(),
        }
    }

    fn into_staged(self) -> Staged {
        self.staged
    }

    fn read(&self, name: &GvName) -> Result<Value, ScriptError> {
        if let Some((_, value)) = self.staged.values.iter().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        match self.view.value(name) {
            Ok(value) => Ok(value.clone()),
            Err(err) if err.is_not_found() => Err(ScriptError::UndeclaredVariable(name.clone())),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, name: &GvName, value: Value) -> Result<(), ScriptError> {
        self.view.check_value(name, &value).map_err(|err| {
            if err.is_not_found() {
                ScriptError::UndeclaredVariable(name.clone())
            } else {
                err.into()
            }
        })?;
        match self.staged.values.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.staged.values.push((name.clone(), value)),
        }
        Ok(())
    }

    fn seen(&self, node: NodeId) -> u32 {
        if let Some((_, count)) = self.staged.seen.iter().find(|(n, _)| *n == node) {
            return *count;
        }
        if self.staged.reset_seen {
            return 0;
        }
        self.view.seen_counter(node)
    }

    fn property(&self, node: NodeId, property: &str) -> Result<Value, ScriptError> {
        let staged = self
            .staged
            .props
            .iter()
            .find(|(n, p, _)| *n == node && p == property);
        if let Some((_, _, value)) = staged {
            return Ok(value.clone());
        }
        Ok(self.view.node_property(node, property)?.clone())
    }

    fn write_property(
        &mut self,
        node: NodeId,
        property: &str,
        value: Value,
    ) -> Result<(), ScriptError> {
        self.view.check_node_property(node, property, &value)?;
        let slot = self
            .staged
            .props
            .iter_mut()
            .find(|(n, p, _)| *n == node && p == property);
        match slot {
            Some((_, _, slot)) => *slot = value,
            None => self.staged.props.push((node, property.to_string(), value)),
        }
        Ok(())
    }

    fn require_mutable(&self, what: &str) -> Result<(), ScriptError> {
        if self.mutable {
            Ok(())
        } else {
            Err(ScriptError::NotAllowed(what.to_string()))
        }
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                let value = match op.binary() {
                    None => rhs,
                    Some(binary) => arithmetic(binary, self.read(target)?, rhs)?,
                };
                self.write(target, value)?;
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => self.read(name),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Int(i)) => {
                        i.checked_neg().map(Value::Int).ok_or(ScriptError::Overflow)
                    }
                    (UnaryOp::Not, other) => Err(ScriptError::TypeMismatch(format!(
                        "'!' needs bool, got {}",
                        other.kind()
                    ))),
                    (UnaryOp::Neg, other) => Err(ScriptError::TypeMismatch(format!(
                        "'-' needs int, got {}",
                        other.kind()
                    ))),
                }
            }
            Expr::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                lhs,
                rhs,
            } => {
                let left = self.boolean(*op, lhs)?;
                // Short-circuit
                match (op, left) {
                    (BinaryOp::And, false) => Ok(Value::Bool(false)),
                    (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                    _ => Ok(Value::Bool(self.boolean(*op, rhs)?)),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                arithmetic(*op, left, right)
            }
            Expr::Call { name, args } => self.call(name, args),
        }
    }

    fn boolean(&mut self, op: BinaryOp, expr: &Expr) -> Result<bool, ScriptError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(ScriptError::TypeMismatch(format!(
                "'{op}' needs bool operands, got {}",
                other.kind()
            ))),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, ScriptError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        let arity = |expected: &'static str| ScriptError::Arity {
            function: name.to_string(),
            expected,
            found: values.len(),
        };

        match name {
            "random" => {
                self.require_mutable("random()")?;
                let (low, high) = match values.as_slice() {
                    [max] => (0, int_arg(name, max)?),
                    [min, max] => (int_arg(name, min)?, int_arg(name, max)?),
                    _ => return Err(arity("1 or 2")),
                };
                if low > high {
                    return Err(ScriptError::TypeMismatch(format!(
                        "random({low}, {high}) has an empty range"
                    )));
                }
                let rng = match self.staged.rng.take() {
                    Some(rng) => rng,
                    None => self.view.rng().ok_or(ScriptError::NoRandomSource)?.clone(),
                };
                let rng = self.staged.rng.insert(rng);
                Ok(Value::Int(rng.range_inclusive(low, high)))
            }
            "getSeenCounter" => {
                let [id] = values.as_slice() else {
                    return Err(arity("1"));
                };
                Ok(Value::Int(i64::from(self.seen(node_arg(name, id)?))))
            }
            "setSeenCounter" => {
                self.require_mutable("setSeenCounter()")?;
                let [id, count] = values.as_slice() else {
                    return Err(arity("2"));
                };
                let node = node_arg(name, id)?;
                let count = int_arg(name, count)?;
                let count = u32::try_from(count).map_err(|_| ScriptError::Overflow)?;
                match self.staged.seen.iter_mut().find(|(n, _)| *n == node) {
                    Some((_, slot)) => *slot = count,
                    None => self.staged.seen.push((node, count)),
                }
                Ok(Value::Int(i64::from(count)))
            }
            "resetAllSeenCounters" => {
                self.require_mutable("resetAllSeenCounters()")?;
                if !values.is_empty() {
                    return Err(arity("0"));
                }
                self.staged.seen.clear();
                self.staged.reset_seen = true;
                Ok(Value::Bool(true))
            }
            "isInRange" => {
                let [value, low, high] = values.as_slice() else {
                    return Err(arity("3"));
                };
                let in_range = match (value, low, high) {
                    (Value::Int(v), Value::Int(lo), Value::Int(hi)) => lo <= v && v <= hi,
                    (Value::String(v), Value::String(lo), Value::String(hi)) => {
                        lo <= v && v <= hi
                    }
                    _ => {
                        return Err(ScriptError::TypeMismatch(format!(
                            "isInRange needs three ints or three strings, got {}, {}, {}",
                            value.kind(),
                            low.kind(),
                            high.kind()
                        )))
                    }
                };
                Ok(Value::Bool(in_range))
            }
            "getProp" => {
                let [id, property] = values.as_slice() else {
                    return Err(arity("2"));
                };
                self.property(node_arg(name, id)?, str_arg(name, property)?)
            }
            "setProp" => {
                self.require_mutable("setProp()")?;
                let [id, property, value] = values.as_slice() else {
                    return Err(arity("3"));
                };
                let node = node_arg(name, id)?;
                self.write_property(node, str_arg(name, property)?, value.clone())?;
                Ok(value.clone())
            }
            "print" => {
                let line = values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                info!(target: "narrative_flow::script", "{line}");
                Ok(Value::Bool(true))
            }
            _ => Err(ScriptError::UnknownFunction(name.to_string())),
        }
    }
}

fn int_arg(function: &str, value: &Value) -> Result<i64, ScriptError> {
    value.as_int().ok_or_else(|| {
        ScriptError::TypeMismatch(format!("{function} needs int arguments, got {}", value.kind()))
    })
}

fn str_arg<'v>(function: &str, value: &'v Value) -> Result<&'v str, ScriptError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ScriptError::TypeMismatch(format!(
            "{function} needs a property name, got {}",
            other.kind()
        ))),
    }
}

/// Node ids may be passed as integers or as `"0x..."` strings.
fn node_arg(function: &str, value: &Value) -> Result<NodeId, ScriptError> {
    let parsed = match value {
        Value::Int(i) => u64::try_from(*i).ok().map(NodeId),
        Value::String(s) => NodeId::parse(s),
        Value::Bool(_) => None,
    };
    parsed.ok_or_else(|| ScriptError::TypeMismatch(format!("{function}: '{value}' is not a node id")))
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, ScriptError> {
    use BinaryOp::*;

    let mismatch = |left: &Value, right: &Value| {
        ScriptError::TypeMismatch(format!(
            "cannot apply '{op}' to {} and {}",
            left.kind(),
            right.kind()
        ))
    };

    match (op, &left, &right) {
        (Eq, l, r) if l.kind() == r.kind() => Ok(Value::Bool(l == r)),
        (Ne, l, r) if l.kind() == r.kind() => Ok(Value::Bool(l != r)),

        (Lt, Value::Int(l), Value::Int(r)) => Ok(Value::Bool(l < r)),
        (Le, Value::Int(l), Value::Int(r)) => Ok(Value::Bool(l <= r)),
        (Gt, Value::Int(l), Value::Int(r)) => Ok(Value::Bool(l > r)),
        (Ge, Value::Int(l), Value::Int(r)) => Ok(Value::Bool(l >= r)),
        (Lt, Value::String(l), Value::String(r)) => Ok(Value::Bool(l < r)),
        (Le, Value::String(l), Value::String(r)) => Ok(Value::Bool(l <= r)),
        (Gt, Value::String(l), Value::String(r)) => Ok(Value::Bool(l > r)),
        (Ge, Value::String(l), Value::String(r)) => Ok(Value::Bool(l >= r)),

        (Add, Value::Int(l), Value::Int(r)) => {
            l.checked_add(*r).map(Value::Int).ok_or(ScriptError::Overflow)
        }
        (Add, Value::String(_), _) | (Add, _, Value::String(_)) => {
            Ok(Value::String(format!("{left}{right}")))
        }
        (Sub, Value::Int(l), Value::Int(r)) => {
            l.checked_sub(*r).map(Value::Int).ok_or(ScriptError::Overflow)
        }
        (Mul, Value::Int(l), Value::Int(r)) => {
            l.checked_mul(*r).map(Value::Int).ok_or(ScriptError::Overflow)
        }
        (Div | Rem, Value::Int(_), Value::Int(0)) => Err(ScriptError::DivisionByZero),
        (Div, Value::Int(l), Value::Int(r)) => {
            l.checked_div(*r).map(Value::Int).ok_or(ScriptError::Overflow)
        }
        (Rem, Value::Int(l), Value::Int(r)) => {
            l.checked_rem(*r).map(Value::Int).ok_or(ScriptError::Overflow)
        }

        _ => Err(mismatch(&left, &right)),
    }
}
