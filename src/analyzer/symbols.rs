use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::DataValue;
use crate::ast::Expression;
use crate::ast::Statement;
use crate::types::TypeDescriptor;
use crate::types::UdtId;

pub type GlobalSlot = u32;

/// One scalar or array variable. Params of the enclosing procedure appear
/// here too, with their position recorded.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    /// slot in the runtime globals vector, when globally stored
    pub global_slot: Option<GlobalSlot>,
    pub param_index: Option<usize>,
    pub byref: bool,
    /// integer FOR counter widened to a 64-bit loop index
    pub promoted_loop_index: bool,
    /// declared by first use instead of DIM
    pub implicit: bool,
}

impl VariableInfo {
    pub fn local(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        VariableInfo {
            name: name.into(),
            ty,
            global_slot: None,
            param_index: None,
            byref: false,
            promoted_loop_index: false,
            implicit: false,
        }
    }

    pub fn is_global(&self) -> bool {
        self.global_slot.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct UdtField {
    pub name: String,
    pub ty: TypeDescriptor,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct UdtInfo {
    pub id: UdtId,
    pub name: String,
    pub fields: Vec<UdtField>,
    pub size: u64,
    pub align: u64,
}

impl UdtInfo {
    pub fn field(&self, name: &str) -> Option<&UdtField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub byref: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureKind {
    Function,
    Sub,
    /// single-expression `DEF FN`
    ExprFn,
}

/// A FUNCTION, SUB or DEF FN with its body and local scope.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub kind: ProcedureKind,
    pub params: Vec<ParamInfo>,
    pub return_type: TypeDescriptor,
    pub body: Vec<Rc<Statement>>,
    /// body of a DEF FN
    pub expr: Option<Expression>,
    pub locals: Scope,
    /// main-scope names this procedure accesses through SHARED
    pub shared: Vec<String>,
}

/// One DATA literal with the BASIC line it came from, so RESTORE with a
/// line argument can find the first slot at or after that line.
#[derive(Debug, Clone)]
pub struct DataEntry {
    pub value: DataValue,
    pub basic_line: Option<u32>,
}

/// Variables of one lexical scope (the main program or one procedure).
/// Iteration order is declaration order, which fixes stack layout and
/// makes emitted IL stable.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub variables: IndexMap<String, VariableInfo>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VariableInfo> {
        self.variables.get_mut(name)
    }

    pub fn insert(&mut self, info: VariableInfo) {
        self.variables.insert(info.name.clone(), info);
    }
}

/// Everything the semantic pass learns about a program: scopes, procedure
/// signatures, user-defined types, the DATA table, and the globals slot
/// count. Write-once; the CFG builder and emitter only read it.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub main: Scope,
    pub functions: IndexMap<String, FunctionInfo>,
    pub udts: IndexMap<String, UdtInfo>,
    pub data: Vec<DataEntry>,
    pub global_count: u32,
}

impl SymbolTable {
    pub fn udt_by_id(&self, id: UdtId) -> Option<&UdtInfo> {
        self.udts.values().find(|u| u.id == id)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    /// Resolves a name inside a procedure: locals and params first, then
    /// SHARED and GLOBAL names from the main scope.
    pub fn resolve<'a>(
        &'a self,
        scope: Option<&'a FunctionInfo>,
        name: &str,
    ) -> Option<&'a VariableInfo> {
        match scope {
            Some(func) => func.locals.get(name).or_else(|| {
                self.main
                    .get(name)
                    .filter(|v| v.is_global() || func.shared.iter().any(|s| s == name))
            }),
            None => self.main.get(name),
        }
    }

    /// First DATA slot at or after the given BASIC line.
    pub fn data_index_for_line(&self, line: u32) -> Option<usize> {
        self.data
            .iter()
            .position(|e| e.basic_line.map(|l| l >= line).unwrap_or(false))
    }
}
