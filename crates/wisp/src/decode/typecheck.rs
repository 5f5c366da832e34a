//! Operand type checking during code decoding, mirroring the validation
//! rules of the format: an operand-type stack plus one entry per open
//! label, with the usual post-`unreachable` polymorphism.

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelKind {
    Func,
    Block,
    Loop,
    If,
    Else,
    Try,
    Catch,
}

#[derive(Debug, Clone)]
pub(crate) struct CheckLabel {
    pub kind: LabelKind,
    /// Zero-or-one result types.
    pub result: Option<Type>,
    /// Operand stack height at label entry.
    pub limit: usize,
    /// Set after `unreachable`/`br`/`return`; pops below `limit` then
    /// yield `Any`.
    pub unreachable: bool,
}

pub(crate) struct TypeChecker {
    stack: Vec<Type>,
    labels: Vec<CheckLabel>,
}

type CheckResult<T> = Result<T, String>;

impl TypeChecker {
    pub fn new() -> TypeChecker {
        TypeChecker { stack: Vec::new(), labels: Vec::new() }
    }

    /// Current operand depth relative to the function's operand base.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push_label(&mut self, kind: LabelKind, result: Option<Type>) {
        self.labels.push(CheckLabel { kind, result, limit: self.stack.len(), unreachable: false });
    }

    pub fn label(&self, depth: u32) -> CheckResult<&CheckLabel> {
        let n = self.labels.len();
        if (depth as usize) < n {
            Ok(&self.labels[n - 1 - depth as usize])
        } else {
            Err("unknown label".into())
        }
    }

    fn top(&self) -> &CheckLabel {
        self.labels.last().expect("label stack is never empty while checking")
    }

    pub fn top_kind(&self) -> LabelKind {
        self.top().kind
    }

    pub fn push(&mut self, ty: Type) {
        self.stack.push(ty);
    }

    pub fn pop_any(&mut self) -> CheckResult<Type> {
        let limit = self.top().limit;
        if self.stack.len() == limit {
            if self.top().unreachable {
                return Ok(Type::Any);
            }
            return Err("type mismatch: operand stack underflow".into());
        }
        Ok(self.stack.pop().unwrap())
    }

    pub fn pop_expect(&mut self, expected: Type) -> CheckResult<Type> {
        let actual = self.pop_any()?;
        if actual != Type::Any && actual != expected {
            return Err(format!("type mismatch: expected {expected}, found {actual}"));
        }
        Ok(actual)
    }

    pub fn mark_unreachable(&mut self) {
        let label = self.labels.last_mut().expect("label stack is never empty while checking");
        label.unreachable = true;
        let limit = label.limit;
        self.stack.truncate(limit);
    }

    /// Check the running arm produced the label's result, then reset for
    /// the other arm.
    pub fn on_else(&mut self) -> CheckResult<()> {
        if self.top().kind != LabelKind::If {
            return Err("else must close an if".into());
        }
        let result = self.top().result;
        self.check_arm_end(result)?;
        let label = self.labels.last_mut().unwrap();
        label.kind = LabelKind::Else;
        label.unreachable = false;
        let limit = label.limit;
        self.stack.truncate(limit);
        Ok(())
    }

    /// Like `on_else` but for catch arms: the running arm must be balanced
    /// and the new arm starts from the label's entry height.
    pub fn on_catch(&mut self) -> CheckResult<()> {
        if self.top().kind != LabelKind::Try {
            return Err("catch must close a try".into());
        }
        let result = self.top().result;
        self.check_arm_end(result)?;
        let label = self.labels.last_mut().unwrap();
        label.kind = LabelKind::Catch;
        label.unreachable = false;
        let limit = label.limit;
        self.stack.truncate(limit);
        Ok(())
    }

    fn check_arm_end(&mut self, result: Option<Type>) -> CheckResult<()> {
        if let Some(ty) = result {
            self.pop_expect(ty)?;
        }
        let label = self.top();
        if !label.unreachable && self.stack.len() != label.limit {
            return Err("type mismatch: values remaining on stack at end of block".into());
        }
        Ok(())
    }

    /// Close the current label; leaves its result on the enclosing stack.
    pub fn on_end(&mut self) -> CheckResult<CheckLabel> {
        let result = self.top().result;
        if self.top().kind == LabelKind::If && result.is_some() {
            return Err("type mismatch: if without else cannot have a result".into());
        }
        self.check_arm_end(result)?;
        let label = self.labels.pop().unwrap();
        self.stack.truncate(label.limit);
        if let Some(ty) = label.result {
            self.stack.push(ty);
        }
        Ok(label)
    }

    /// The types a branch to `depth` must supply: none for loops (their
    /// label is the head), the label result otherwise.
    pub fn br_result(&self, depth: u32) -> CheckResult<Option<Type>> {
        let label = self.label(depth)?;
        if label.kind == LabelKind::Loop {
            Ok(None)
        } else {
            Ok(label.result)
        }
    }

    pub fn on_br(&mut self, depth: u32) -> CheckResult<()> {
        if let Some(ty) = self.br_result(depth)? {
            self.pop_expect(ty)?;
        }
        self.mark_unreachable();
        Ok(())
    }

    pub fn on_br_if(&mut self, depth: u32) -> CheckResult<()> {
        self.pop_expect(Type::I32)?;
        if let Some(ty) = self.br_result(depth)? {
            self.pop_expect(ty)?;
            self.push(ty);
        }
        Ok(())
    }

    pub fn on_br_table(&mut self, targets: &[u32], default: u32) -> CheckResult<()> {
        self.pop_expect(Type::I32)?;
        let expected = self.br_result(default)?;
        for &t in targets {
            if self.br_result(t)? != expected {
                return Err("type mismatch: br_table target arity differs".into());
            }
        }
        if let Some(ty) = expected {
            self.pop_expect(ty)?;
        }
        self.mark_unreachable();
        Ok(())
    }

    pub fn on_call(&mut self, params: &[Type], results: &[Type]) -> CheckResult<()> {
        for &p in params.iter().rev() {
            self.pop_expect(p)?;
        }
        for &r in results {
            self.push(r);
        }
        Ok(())
    }

    pub fn on_select(&mut self) -> CheckResult<()> {
        self.pop_expect(Type::I32)?;
        let a = self.pop_any()?;
        let b = if a == Type::Any { self.pop_any()? } else { self.pop_expect(a)? };
        self.push(if a != Type::Any { a } else { b });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_block() {
        let mut tc = TypeChecker::new();
        tc.push_label(LabelKind::Func, Some(Type::I32));
        tc.push_label(LabelKind::Block, Some(Type::I32));
        tc.push(Type::I32);
        let label = tc.on_end().unwrap();
        assert_eq!(label.limit, 0);
        assert_eq!(tc.depth(), 1);
        assert!(tc.on_end().is_ok());
    }

    #[test]
    fn underflow_is_an_error() {
        let mut tc = TypeChecker::new();
        tc.push_label(LabelKind::Func, None);
        assert!(tc.pop_expect(Type::I32).is_err());
    }

    #[test]
    fn unreachable_is_polymorphic() {
        let mut tc = TypeChecker::new();
        tc.push_label(LabelKind::Func, Some(Type::I64));
        tc.mark_unreachable();
        assert_eq!(tc.pop_expect(Type::I32), Ok(Type::Any));
        assert!(tc.on_end().is_ok());
    }

    #[test]
    fn else_resets_the_arm() {
        let mut tc = TypeChecker::new();
        tc.push_label(LabelKind::Func, None);
        tc.push_label(LabelKind::If, Some(Type::I32));
        tc.push(Type::I32);
        tc.on_else().unwrap();
        assert_eq!(tc.depth(), 0);
        tc.push(Type::I32);
        assert!(tc.on_end().is_ok());
    }

    #[test]
    fn loop_branches_carry_no_values() {
        let mut tc = TypeChecker::new();
        tc.push_label(LabelKind::Func, None);
        tc.push_label(LabelKind::Loop, Some(Type::I32));
        assert_eq!(tc.br_result(0).unwrap(), None);
        assert_eq!(tc.br_result(1).unwrap(), None);
        assert!(tc.label(2).is_err());
    }
}
