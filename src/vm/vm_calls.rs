//! Function call dispatch for the VM.

use std::rc::Rc;

use crate::error::RuntimeErrorKind;
use crate::value::{Class, Closure, Instance, LoxString, NativeFunction, Obj, Value};

use super::vm::{CallFrame, ExecResult, Vm};

impl Vm {
    /// Call a value with `arg_count` arguments on top of the stack.
    /// The callee sits just below the arguments.
    pub(super) fn call_value(&mut self, callee: Value, arg_count: usize) -> ExecResult {
        let callee_slot = self.stack.len() - 1 - arg_count;
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call(closure, arg_count),
            Value::Obj(Obj::BoundMethod(bound)) => {
                // The receiver takes the callee's slot so the method sees it as `this`.
                self.stack[callee_slot] = bound.receiver.clone();
                self.call(bound.method.clone(), arg_count)
            }
            Value::Obj(Obj::Class(class)) => self.call_class(class, arg_count),
            Value::Obj(Obj::Native(native)) => self.call_native(&native, arg_count),
            _ => Err(RuntimeErrorKind::NotCallable),
        }
    }

    /// Push a frame for `closure`.
    pub(super) fn call(&mut self, closure: Rc<Closure>, arg_count: usize) -> ExecResult {
        let arity = closure.function.arity;
        if arg_count != arity {
            return Err(RuntimeErrorKind::wrong_arity(arity, arg_count));
        }

        if self.frames.len() >= self.options().max_frames {
            return Err(RuntimeErrorKind::StackOverflow);
        }

        let slots = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots,
        });
        Ok(())
    }

    /// Calling a class creates an instance and runs `init` on it, if the class has one.
    fn call_class(&mut self, class: Rc<Class>, arg_count: usize) -> ExecResult {
        let callee_slot = self.stack.len() - 1 - arg_count;
        let initializer = class.find_method(&self.init_string);
        let instance = Instance::new(class);
        self.stack[callee_slot] = Value::Obj(Obj::Instance(Rc::new(instance)));

        match initializer {
            Some(initializer) => self.call(initializer, arg_count),
            None if arg_count != 0 => Err(RuntimeErrorKind::wrong_arity(0, arg_count)),
            None => Ok(()),
        }
    }

    fn call_native(&mut self, native: &NativeFunction, arg_count: usize) -> ExecResult {
        if let Some(expected) = native.arity {
            if arg_count != expected {
                return Err(RuntimeErrorKind::wrong_arity(expected, arg_count));
            }
        }

        let args_start = self.stack.len() - arg_count;
        let result = (native.function)(&self.stack[args_start..]);
        // Drop the arguments and the callee.
        self.stack.truncate(args_start - 1);
        self.push(result);
        Ok(())
    }

    /// `receiver.name(args)` without materialising a bound method.
    pub(super) fn invoke(&mut self, name: &LoxString, arg_count: usize) -> ExecResult {
        let receiver = self.peek(arg_count).clone();
        let Some(instance) = receiver.as_instance() else {
            return Err(RuntimeErrorKind::OnlyInstancesHaveMethods);
        };

        // A field holding a callable shadows a method of the same name.
        let field = instance.fields.borrow().get(name).cloned();
        if let Some(field) = field {
            let callee_slot = self.stack.len() - 1 - arg_count;
            self.stack[callee_slot] = field.clone();
            return self.call_value(field, arg_count);
        }

        self.invoke_from_class(&instance.class, name, arg_count)
    }

    pub(super) fn invoke_from_class(
        &mut self,
        class: &Rc<Class>,
        name: &LoxString,
        arg_count: usize,
    ) -> ExecResult {
        match class.find_method(name) {
            Some(method) => self.call(method, arg_count),
            None => Err(RuntimeErrorKind::undefined_property(name.as_str())),
        }
    }
}
