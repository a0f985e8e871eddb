//! Class operations for the VM: property access, method binding, inheritance.

use std::rc::Rc;

use crate::error::RuntimeErrorKind;
use crate::value::{BoundMethod, Class, LoxString, Obj, Value};

use super::vm::{ExecResult, Vm};

impl Vm {
    /// Replace the instance on top of the stack with its field `name`, or with a bound
    /// method when no such field exists.
    pub(super) fn get_property(&mut self, name: &LoxString) -> ExecResult {
        let Some(instance) = self.peek(0).as_instance().cloned() else {
            return Err(RuntimeErrorKind::OnlyInstancesHaveProperties);
        };

        let field = instance.fields.borrow().get(name).cloned();
        if let Some(value) = field {
            self.pop();
            self.push(value);
            return Ok(());
        }

        self.bind_method(&instance.class, name)
    }

    /// `instance.name = value`: leaves the value on the stack.
    pub(super) fn set_property(&mut self, name: Rc<LoxString>) -> ExecResult {
        let Some(instance) = self.peek(1).as_instance().cloned() else {
            return Err(RuntimeErrorKind::OnlyInstancesHaveFields);
        };

        let value = self.pop();
        instance.fields.borrow_mut().set(name, value.clone());
        self.pop();
        self.push(value);
        Ok(())
    }

    /// Replace the receiver on top of the stack with `class.name` bound to it.
    pub(super) fn bind_method(&mut self, class: &Rc<Class>, name: &LoxString) -> ExecResult {
        let Some(method) = class.find_method(name) else {
            return Err(RuntimeErrorKind::undefined_property(name.as_str()));
        };

        let receiver = self.pop();
        let bound = BoundMethod { receiver, method };
        self.push(Value::Obj(Obj::BoundMethod(Rc::new(bound))));
        Ok(())
    }

    /// Copy the superclass's methods into the subclass on top of the stack, then pop it.
    /// Methods declared in the subclass body are added afterwards and override these.
    pub(super) fn inherit(&mut self) -> ExecResult {
        let Some(superclass) = self.peek(1).as_class().cloned() else {
            return Err(RuntimeErrorKind::SuperclassMustBeClass);
        };
        let Some(subclass) = self.peek(0).as_class().cloned() else {
            return Err(RuntimeErrorKind::SuperclassMustBeClass);
        };

        if !Rc::ptr_eq(&superclass, &subclass) {
            superclass
                .methods
                .borrow()
                .add_all(&mut subclass.methods.borrow_mut());
        }
        self.pop();
        Ok(())
    }

    /// Attach the closure on top of the stack to the class below it.
    pub(super) fn define_method(&mut self, name: Rc<LoxString>) {
        let method = match self.pop() {
            Value::Obj(Obj::Closure(closure)) => closure,
            other => {
                log::warn!("OP_METHOD operand is not a closure: {}", other);
                return;
            }
        };
        if let Some(class) = self.peek(0).as_class() {
            class.methods.borrow_mut().set(name, method);
        }
    }
}
