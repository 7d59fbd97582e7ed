//! The bytecode function and module shapes this crate consumes.

use jitvm_abi::Value;

/// A single bytecode function: its encoding and the constant pool its
/// `PushConst` instructions index into.
///
/// Referenced by identity via `qualified_name`, the stable key
/// (`"Class::method"` or bare `"name"`) used by the function table and
/// code cache.
#[derive(Debug, Clone)]
pub struct BytecodeFunction {
    pub name: String,
    pub qualified_name: String,
    pub arity: u8,
    pub local_count: u16,
    pub variadic: bool,
    pub upvalue_count: u16,
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
}

impl BytecodeFunction {
    pub fn new(name: impl Into<String>, arity: u8, local_count: u16, code: Vec<u8>) -> Self {
        let name = name.into();
        Self {
            qualified_name: name.clone(),
            name,
            arity,
            local_count,
            variadic: false,
            upvalue_count: 0,
            code,
            constants: Vec::new(),
        }
    }

    pub fn with_constants(mut self, constants: Vec<Value>) -> Self {
        self.constants = constants;
        self
    }

    pub fn constant(&self, index: u16) -> Option<&Value> {
        self.constants.get(index as usize)
    }
}

/// A collection of bytecode functions, indexed by position. Functions
/// reference each other by index for direct calls.
#[derive(Debug, Default)]
pub struct Module {
    pub functions: Vec<BytecodeFunction>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: BytecodeFunction) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push(function);
        index
    }

    pub fn get(&self, index: u32) -> Option<&BytecodeFunction> {
        self.functions.get(index as usize)
    }
}
