//! Model methods
//!
//! Each method name maps to a stack of closures. Calling the method runs the
//! most recently registered closure; that closure may hand control to the one
//! registered before it through [`MethodCall::parent`].

use std::fmt;
use std::sync::Arc;

use crate::error::OrmResult;
use crate::record::Record;
use crate::recordset::RecordSet;
use crate::value::FieldValue;

/// A registered method body
pub type MethodFn = Arc<dyn Fn(&MethodCall<'_>) -> OrmResult<FieldValue> + Send + Sync>;

/// Wrap a closure as a [`MethodFn`]
pub fn method<F>(f: F) -> MethodFn
where
    F: Fn(&MethodCall<'_>) -> OrmResult<FieldValue> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a method was called on
#[derive(Debug, Clone)]
pub enum Receiver {
    Record(Record),
    Set(RecordSet),
}

/// Ordered closures for one method name, last registered wins
#[derive(Clone, Default)]
pub struct MethodStack {
    closures: Vec<MethodFn>,
}

impl MethodStack {
    pub fn push(&mut self, f: MethodFn) {
        self.closures.push(f);
    }

    pub fn len(&self) -> usize {
        self.closures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    /// Run the top of the stack; an empty stack yields null
    pub fn invoke(&self, receiver: Receiver, args: &[FieldValue]) -> OrmResult<FieldValue> {
        invoke_top(&receiver, args, &self.closures)
    }
}

impl fmt::Debug for MethodStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodStack").field("depth", &self.closures.len()).finish()
    }
}

fn invoke_top(receiver: &Receiver, args: &[FieldValue], stack: &[MethodFn]) -> OrmResult<FieldValue> {
    match stack.split_last() {
        Some((top, below)) => top(&MethodCall {
            receiver,
            args,
            below,
        }),
        None => Ok(FieldValue::null()),
    }
}

/// Context handed to a running method
pub struct MethodCall<'a> {
    receiver: &'a Receiver,
    args: &'a [FieldValue],
    below: &'a [MethodFn],
}

impl<'a> MethodCall<'a> {
    pub fn receiver(&self) -> &Receiver {
        self.receiver
    }

    /// The record the method runs on, if it is a record method
    pub fn record(&self) -> Option<&Record> {
        match self.receiver {
            Receiver::Record(record) => Some(record),
            Receiver::Set(_) => None,
        }
    }

    /// The recordset the method runs on, if it is a set method
    pub fn set(&self) -> Option<&RecordSet> {
        match self.receiver {
            Receiver::Set(set) => Some(set),
            Receiver::Record(_) => None,
        }
    }

    pub fn args(&self) -> &[FieldValue] {
        self.args
    }

    /// Positional argument, null when absent
    pub fn arg(&self, index: usize) -> FieldValue {
        self.args.get(index).cloned().unwrap_or_default()
    }

    /// Call the closure registered before this one
    pub fn parent(&self, args: &[FieldValue]) -> OrmResult<FieldValue> {
        invoke_top(self.receiver, args, self.below)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn test_last_registered_wins_and_chains() {
        let mut stack = MethodStack::default();
        stack.push(method(|_| Ok(FieldValue::from("base"))));
        stack.push(method(|call| {
            let inner = call.parent(call.args())?;
            Ok(FieldValue::from(format!("wrapped({})", inner.as_str().unwrap_or_default())))
        }));

        let result = stack.invoke(Receiver::Record(Record::new()), &[]).unwrap();
        assert_eq!(result, FieldValue::from("wrapped(base)"));
    }

    #[test]
    fn test_empty_stack_yields_null() {
        let stack = MethodStack::default();
        assert!(stack.invoke(Receiver::Record(Record::new()), &[]).unwrap().is_null());
    }

    #[test]
    fn test_missing_argument_is_null() {
        let mut stack = MethodStack::default();
        stack.push(method(|call| Ok(call.arg(3))));
        let result = stack
            .invoke(Receiver::Record(Record::new()), &[FieldValue::from(1i64)])
            .unwrap();
        assert!(result.is_null());
    }
}
