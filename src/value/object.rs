//! Heap objects.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::chunk::Chunk;

use super::table::Table;
use super::Value;

/// A reference to a heap object.
#[derive(Debug, Clone)]
pub enum Obj {
    String(Rc<LoxString>),
    Function(Rc<Function>),
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    BoundMethod(Rc<BoundMethod>),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) | Obj::Closure(_) | Obj::BoundMethod(_) => "function",
            Obj::Native(_) => "native function",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
        }
    }
}

/// Strings compare by content, every other object by identity.
impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Obj::String(a), Obj::String(b)) => a == b,
            (Obj::Function(a), Obj::Function(b)) => Rc::ptr_eq(a, b),
            (Obj::Closure(a), Obj::Closure(b)) => Rc::ptr_eq(a, b),
            (Obj::Native(a), Obj::Native(b)) => Rc::ptr_eq(a, b),
            (Obj::Class(a), Obj::Class(b)) => Rc::ptr_eq(a, b),
            (Obj::Instance(a), Obj::Instance(b)) => Rc::ptr_eq(a, b),
            (Obj::BoundMethod(a), Obj::BoundMethod(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::String(s) => write!(f, "{}", s),
            Obj::Function(function) => write!(f, "{}", function),
            Obj::Closure(closure) => write!(f, "{}", closure.function),
            Obj::Native(_) => write!(f, "<native fn>"),
            Obj::Class(class) => write!(f, "{}", class.name),
            Obj::Instance(instance) => write!(f, "{} instance", instance.class.name),
            Obj::BoundMethod(bound) => write!(f, "{}", bound.method.function),
        }
    }
}

/// An immutable string with its hash computed once, at creation.
#[derive(Clone, PartialEq, Eq)]
pub struct LoxString {
    text: Box<str>,
    hash: u32,
}

impl LoxString {
    pub fn new(text: impl Into<String>) -> Self {
        let text: Box<str> = text.into().into_boxed_str();
        let hash = hash_str(&text);
        Self { text, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for LoxString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for LoxString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.text)
    }
}

/// 32-bit FNV-1a.
fn hash_str(text: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// A compiled function. The top-level script is a function without a name.
#[derive(Debug, Default)]
pub struct Function {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<Rc<LoxString>>,
}

impl Function {
    pub fn new(name: Option<Rc<LoxString>>) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Name used in stack traces; `None` for the script.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(LoxString::as_str)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<script>"),
        }
    }
}

/// A captured variable.
///
/// While the variable still lives on the stack the upvalue is open and records its slot.
/// When the slot goes out of scope the value moves into the upvalue, which is then closed.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

/// A function together with the variables it captured.
pub struct Closure {
    pub function: Rc<Function>,
    pub upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

impl Closure {
    pub fn new(function: Rc<Function>, upvalues: Vec<Rc<RefCell<Upvalue>>>) -> Self {
        Self { function, upvalues }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<closure {}>", self.function)
    }
}

pub type NativeFn = fn(&[Value]) -> Value;

/// A function implemented by the host.
pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any number of arguments.
    pub arity: Option<usize>,
    pub function: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

pub struct Class {
    pub name: Rc<LoxString>,
    pub methods: RefCell<Table<Rc<Closure>>>,
}

impl Class {
    pub fn new(name: Rc<LoxString>) -> Self {
        Self {
            name,
            methods: RefCell::new(Table::new()),
        }
    }

    pub fn find_method(&self, name: &LoxString) -> Option<Rc<Closure>> {
        self.methods.borrow().get(name).cloned()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<Table<Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: RefCell::new(Table::new()),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance>", self.class.name)
    }
}

/// A method closure paired with the receiver it was accessed on.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Rc<Closure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_hash() {
        assert_eq!(LoxString::new("").hash(), 2_166_136_261);
        assert_eq!(LoxString::new("a").hash(), 0xe40c_292c);
        assert_eq!(LoxString::new("foobar").hash(), 0xbf9c_f968);
    }

    #[test]
    fn test_identity_equality() {
        let class = Rc::new(Class::new(Rc::new(LoxString::new("Point"))));
        let a = Obj::Instance(Rc::new(Instance::new(class.clone())));
        let b = Obj::Instance(Rc::new(Instance::new(class)));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "Point instance");
    }

    #[test]
    fn test_function_display() {
        assert_eq!(Function::new(None).to_string(), "<script>");
        let named = Function::new(Some(Rc::new(LoxString::new("add"))));
        assert_eq!(named.to_string(), "<fn add>");
    }
}
