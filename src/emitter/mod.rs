pub mod expr;
pub mod stmt;

use indexmap::IndexMap;
use itertools::Itertools;
use log::trace;
use thiserror::Error;

use crate::analyzer::FunctionInfo;
use crate::analyzer::ProcedureKind;
use crate::analyzer::SymbolTable;
use crate::analyzer::VariableInfo;
use crate::ast::DataValue;
use crate::ast::StatementKind;
use crate::cfg::BlockId;
use crate::cfg::ControlFlowGraph;
use crate::diagnostics::Diagnostics;
use crate::diagnostics::SourceLoc;
use crate::runtime::abi;
use crate::runtime::abi::DataTag;
use crate::types::BaseType;
use crate::types::TypeDescriptor;
use crate::types::TypeError;
use crate::types::ValueClass;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("{loc}: {source}")]
    Type {
        loc: SourceLoc,
        source: TypeError,
    },
    #[error("{loc}: unknown variable {name}")]
    UnknownVariable { loc: SourceLoc, name: String },
    #[error("{loc}: unknown function or array {name}")]
    UnknownCallee { loc: SourceLoc, name: String },
    #[error("{loc}: {name} is not an array")]
    NotAnArray { loc: SourceLoc, name: String },
    #[error("{loc}: {what} is not supported here")]
    Unsupported { loc: SourceLoc, what: String },
    #[error("block {block} has successors but no branching statement")]
    MissingTerminator { block: BlockId },
}

/// An evaluated expression: a QBE operand (temporary, constant or symbol)
/// with its BASIC type. `owned_string` marks a fresh string reference the
/// current statement must release or hand off.
#[derive(Debug, Clone)]
pub struct Value {
    pub repr: String,
    pub ty: TypeDescriptor,
    pub owned_string: bool,
}

impl Value {
    pub fn new(repr: impl Into<String>, ty: TypeDescriptor) -> Self {
        Value {
            repr: repr.into(),
            ty,
            owned_string: false,
        }
    }

    pub fn owned(repr: impl Into<String>, ty: TypeDescriptor) -> Self {
        Value {
            repr: repr.into(),
            ty,
            owned_string: true,
        }
    }
}

/// Module-level emission state: constant pools and the output accumulator.
/// Everything per-function lives in [`FuncEmitter`].
pub struct Emitter<'a> {
    pub symbols: &'a SymbolTable,
    pub diags: &'a mut Diagnostics,
    /// interned string literals: text -> data symbol
    string_pool: IndexMap<String, String>,
    functions_out: String,
}

/// Lowers all CFGs of one program into a QBE module.
pub fn emit_program(
    graphs: &[ControlFlowGraph],
    symbols: &SymbolTable,
    diags: &mut Diagnostics,
) -> Result<String, EmitError> {
    let mut emitter = Emitter {
        symbols,
        diags,
        string_pool: IndexMap::new(),
        functions_out: String::new(),
    };

    // procedures first, $main last
    for graph in graphs.iter().filter(|g| g.function.is_some()) {
        emitter.emit_function(graph)?;
    }
    for func in symbols.functions.values() {
        if func.kind == ProcedureKind::ExprFn {
            emitter.emit_expr_function(func)?;
        }
    }
    let main = graphs
        .iter()
        .find(|g| g.function.is_none())
        .expect("program CFG present");
    emitter.emit_function(main)?;

    let mut out = String::new();
    emitter.render_udt_types(&mut out);
    emitter.render_data_section(&mut out);
    out.push_str(&emitter.functions_out);
    trace!("emitted {} bytes of IL", out.len());
    Ok(out)
}

impl<'a> Emitter<'a> {
    /// Interns a string literal and returns its data symbol.
    pub fn intern_string(&mut self, text: &str) -> String {
        if let Some(sym) = self.string_pool.get(text) {
            return sym.clone();
        }
        let sym = format!("$str_{}", self.string_pool.len());
        self.string_pool.insert(text.to_string(), sym.clone());
        sym
    }

    fn render_udt_types(&self, out: &mut String) {
        for udt in self.symbols.udts.values() {
            // opaque layout; every access goes through computed offsets
            out.push_str(&format!(
                "type :{} = align {} {{ {} }}\n",
                il_name(&udt.name),
                udt.align.max(1),
                udt.size.max(1)
            ));
        }
        if !self.symbols.udts.is_empty() {
            out.push('\n');
        }
    }

    fn render_data_section(&self, out: &mut String) {
        for (text, sym) in &self.string_pool {
            out.push_str(&format!("data {} = {{ {}, b 0 }}\n", sym, data_bytes(text)));
        }
        if !self.symbols.data.is_empty() {
            let values = self
                .symbols
                .data
                .iter()
                .map(|entry| match &entry.value {
                    DataValue::Int(n) => format!("l {n}"),
                    DataValue::Float(x) => format!("l {}", x.to_bits()),
                    DataValue::Str(s) => {
                        let sym = self
                            .string_pool
                            .get(s)
                            .expect("DATA strings interned during emission");
                        format!("l {sym}")
                    }
                })
                .join(", ");
            let tags = self
                .symbols
                .data
                .iter()
                .map(|entry| {
                    let tag = match &entry.value {
                        DataValue::Int(_) => DataTag::Int,
                        DataValue::Float(_) => DataTag::DoubleBits,
                        DataValue::Str(_) => DataTag::StringPtr,
                    };
                    format!("b {}", u8::from(tag))
                })
                .join(", ");
            out.push_str(&format!("data $data_values = {{ {values} }}\n"));
            out.push_str(&format!("data $data_tags = {{ {tags} }}\n"));
        }
        if !self.string_pool.is_empty() || !self.symbols.data.is_empty() {
            out.push('\n');
        }
    }

    fn emit_function(&mut self, cfg: &ControlFlowGraph) -> Result<(), EmitError> {
        let func = cfg
            .function
            .as_ref()
            .and_then(|meta| self.symbols.functions.get(&meta.name));
        let mut fe = FuncEmitter {
            cfg: Some(cfg),
            func,
            temps: 0,
            labels: 0,
            lines: Vec::new(),
            string_temps: Vec::new(),
            uses_globals: self.symbols.global_count > 0,
            em: self,
        };
        let text = fe.emit()?;
        self.functions_out.push_str(&text);
        self.functions_out.push('\n');
        Ok(())
    }

    /// A DEF FN compiles to an ordinary function around its expression.
    fn emit_expr_function(&mut self, func: &'a FunctionInfo) -> Result<(), EmitError> {
        let mut fe = FuncEmitter {
            cfg: None,
            func: Some(func),
            temps: 0,
            labels: 0,
            lines: Vec::new(),
            string_temps: Vec::new(),
            uses_globals: self.symbols.global_count > 0,
            em: self,
        };
        let text = fe.emit_expr_fn()?;
        self.functions_out.push_str(&text);
        self.functions_out.push('\n');
        Ok(())
    }
}

/// Per-function emission state: the temporary counter, the instruction
/// buffer, and the statement-local string temporaries pending release.
pub struct FuncEmitter<'e, 'a> {
    pub em: &'e mut Emitter<'a>,
    pub cfg: Option<&'e ControlFlowGraph>,
    pub func: Option<&'e FunctionInfo>,
    temps: usize,
    labels: usize,
    lines: Vec<String>,
    string_temps: Vec<String>,
    uses_globals: bool,
}

impl FuncEmitter<'_, '_> {
    // ---- small pieces ----------------------------------------------------

    pub fn tmp(&mut self) -> String {
        let t = format!("%t.{}", self.temps);
        self.temps += 1;
        t
    }

    pub fn fresh_label(&mut self, stem: &str) -> String {
        let l = format!("@{}.{}", stem, self.labels);
        self.labels += 1;
        l
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(format!("\t{}", line.into()));
    }

    pub fn push_label(&mut self, label: &str) {
        self.lines.push(label.to_string());
    }

    /// Registers a fresh string reference for end-of-statement release.
    pub fn track_string(&mut self, value: &Value) {
        if value.owned_string {
            self.string_temps.push(value.repr.clone());
        }
    }

    /// Transfers ownership out of the statement (assignment, return).
    pub fn untrack_string(&mut self, value: &Value) {
        if let Some(pos) = self.string_temps.iter().position(|t| *t == value.repr) {
            self.string_temps.remove(pos);
        }
    }

    pub fn release_string_temps(&mut self) {
        let temps = std::mem::take(&mut self.string_temps);
        for t in temps {
            self.push(format!("call ${}(l {})", abi::string::RELEASE, t));
        }
    }

    pub fn scope_lookup(&self, name: &str) -> Option<&VariableInfo> {
        self.em.symbols.resolve(self.func, name)
    }

    pub fn block_label(&self, id: BlockId) -> String {
        format!(
            "@{}",
            self.cfg.expect("block emission needs a CFG").block(id).label
        )
    }

    // ---- function shell --------------------------------------------------

    fn signature(&self) -> String {
        match self.func {
            Some(func) => {
                let params = func
                    .params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let class = if p.byref {
                            ValueClass::Long
                        } else {
                            p.ty.value_class()
                        };
                        format!("{class} %p{i}")
                    })
                    .join(", ");
                let ret = if func.return_type.is_void() {
                    String::new()
                } else {
                    format!("{} ", func.return_type.value_class())
                };
                format!(
                    "export function {}${}({})",
                    ret,
                    il_name(&func.name),
                    params
                )
            }
            None => "export function w $main()".to_string(),
        }
    }

    fn emit(&mut self) -> Result<String, EmitError> {
        let cfg = self.cfg.expect("CFG-driven emission");
        self.push_label("@start");
        self.emit_prologue();

        let order = cfg.reverse_postorder();
        for id in order {
            if id == cfg.exit {
                self.emit_exit_block();
                continue;
            }
            self.emit_block(id)?;
        }
        Ok(self.render())
    }

    fn emit_expr_fn(&mut self) -> Result<String, EmitError> {
        let func = self.func.expect("DEF FN emission needs its signature");
        self.push_label("@start");
        self.emit_prologue();
        let expr = func.expr.clone().expect("DEF FN carries an expression");
        let value = self.emit_expr(&expr, SourceLoc::default())?;
        let value = self.coerce_value(value, &func.return_type, SourceLoc::default())?;
        self.transfer_string_ownership(&value);
        self.release_string_temps();
        self.push(format!("ret {}", value.repr));
        Ok(self.render())
    }

    fn render(&mut self) -> String {
        let mut out = String::new();
        out.push_str(&self.signature());
        out.push_str(" {\n");
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }

    /// Stack slots for every local, zero-initialized; incoming parameters
    /// are copied into their slots; the globals base pointer is cached.
    fn emit_prologue(&mut self) {
        let scope = match self.func {
            Some(func) => &func.locals,
            None => &self.em.symbols.main,
        };
        let locals: Vec<VariableInfo> = scope.variables.values().cloned().collect();
        for info in &locals {
            if info.is_global() {
                continue;
            }
            let slot = self.slot_name(&info.name);
            let (size, align) = self.storage_of(&info.ty);
            self.push(format!("{slot} =l alloc{align} {size}"));
            self.zero_init(&slot, &info.ty, size);
        }
        if let Some(func) = self.func {
            for (i, param) in func.params.iter().enumerate().collect::<Vec<_>>() {
                let slot = self.slot_name(&param.name);
                if param.byref {
                    self.push(format!("storel %p{i}, {slot}"));
                } else {
                    let op = param.ty.mem_op();
                    self.push(format!("store{} %p{i}, {slot}", op.store_suffix()));
                }
            }
        }
        if self.func.is_none() {
            self.push(format!("call ${}()", abi::rt::INIT));
            if self.em.symbols.global_count > 0 {
                self.push(format!(
                    "call ${}(w {})",
                    abi::globals::INIT,
                    self.em.symbols.global_count
                ));
            }
            if !self.em.symbols.data.is_empty() {
                // string DATA entries must exist in the pool before the
                // data section renders
                let strings: Vec<String> = self
                    .em
                    .symbols
                    .data
                    .iter()
                    .filter_map(|e| match &e.value {
                        DataValue::Str(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect();
                for s in strings {
                    self.em.intern_string(&s);
                }
                self.push(format!(
                    "call ${}(l $data_values, l $data_tags, w {})",
                    abi::data::REGISTER,
                    self.em.symbols.data.len()
                ));
            }
        }
        if self.uses_globals {
            self.push(format!("%gb =l call ${}()", abi::globals::BASE));
        }
    }

    fn emit_exit_block(&mut self) {
        let cfg = self.cfg.expect("CFG-driven emission");
        self.push_label(&self.block_label(cfg.exit));
        match self.func {
            Some(func) => {
                if func.return_type.is_void() {
                    self.push("ret");
                } else {
                    // the result slot is a local named after the function
                    let slot = self.slot_name(&func.name);
                    let t = self.tmp();
                    let ty = func.return_type.clone();
                    self.push(format!(
                        "{t} ={} load{} {slot}",
                        ty.value_class(),
                        ty.mem_op()
                    ));
                    self.push(format!("ret {t}"));
                }
            }
            None => {
                if self.em.symbols.global_count > 0 {
                    self.push(format!("call ${}()", abi::globals::CLEANUP));
                }
                self.push(format!("call ${}()", abi::rt::CLEANUP));
                self.push("ret 0");
            }
        }
    }

    // ---- blocks ----------------------------------------------------------

    fn emit_block(&mut self, id: BlockId) -> Result<(), EmitError> {
        let cfg = self.cfg.expect("CFG-driven emission");
        let block = cfg.block(id).clone();
        self.push_label(&self.block_label(id));

        // catch landing pads read the pending error value first
        if let Some((_, catch_var)) = cfg.catch_blocks.iter().find(|(b, _)| *b == id) {
            let t = self.tmp();
            self.push(format!("{t} =w call ${}()", abi::error::GET));
            if let Some(var) = catch_var.clone() {
                let loc = block.first_line().unwrap_or_default();
                let value = Value::new(t, TypeDescriptor::integer());
                self.store_variable(&var, value, loc)?;
            }
        }

        let mut branched = false;
        for (i, statement) in block.statements.iter().enumerate() {
            let last = i + 1 == block.statements.len();
            if last && self.is_branching(&statement.kind) {
                self.emit_branching(statement, &block)?;
                branched = true;
            } else {
                self.emit_statement(statement)?;
            }
        }

        if !branched {
            let succs = &block.successors;
            match succs.len() {
                0 => {
                    // dead end outside the exit block
                    self.push("hlt");
                }
                1 => {
                    let target = self.block_label(succs[0]);
                    self.push(format!("jmp {target}"));
                }
                _ => return Err(EmitError::MissingTerminator { block: id }),
            }
        }
        Ok(())
    }

    fn is_branching(&self, kind: &StatementKind) -> bool {
        matches!(
            kind,
            StatementKind::If { .. }
                | StatementKind::IfGoto { .. }
                | StatementKind::Goto { .. }
                | StatementKind::Gosub { .. }
                | StatementKind::Return { .. }
                | StatementKind::OnGoto { .. }
                | StatementKind::OnGosub { .. }
                | StatementKind::Exit { .. }
                | StatementKind::Continue
                | StatementKind::End
                | StatementKind::Throw { .. }
        )
    }

    // ---- storage helpers -------------------------------------------------

    pub fn slot_name(&self, name: &str) -> String {
        format!("%v.{}", il_name(name))
    }

    /// (bytes, alignment suffix for alloc)
    fn storage_of(&self, ty: &TypeDescriptor) -> (u64, u64) {
        if ty.is_array() || ty.is_string() {
            return (8, 8);
        }
        match (&ty.base, &ty.udt) {
            (BaseType::UserDefined, Some(udt)) => {
                let info = self
                    .em
                    .symbols
                    .udt_by_id(udt.id)
                    .expect("emitting a registered UDT");
                (info.size, 8)
            }
            _ => {
                let size = ty.size_bytes();
                (size, if size < 4 { 4 } else { size })
            }
        }
    }

    fn zero_init(&mut self, slot: &str, ty: &TypeDescriptor, size: u64) {
        if ty.is_array() || ty.is_string() || ty.base.is_pointer_sized() && ty.udt.is_none() {
            self.push(format!("storel 0, {slot}"));
            return;
        }
        if ty.base == BaseType::UserDefined {
            let mut off = 0;
            while off + 8 <= size {
                let addr = self.tmp();
                self.push(format!("{addr} =l add {slot}, {off}"));
                self.push(format!("storel 0, {addr}"));
                off += 8;
            }
            while off < size {
                let addr = self.tmp();
                self.push(format!("{addr} =l add {slot}, {off}"));
                self.push(format!("storeb 0, {addr}"));
                off += 1;
            }
            return;
        }
        let zero = match ty.value_class() {
            ValueClass::Single => "s_0".to_string(),
            ValueClass::Double => "d_0".to_string(),
            _ => "0".to_string(),
        };
        self.push(format!("store{} {}, {}", ty.mem_op().store_suffix(), zero, slot));
    }
}

/// Rewrites a BASIC identifier (possibly carrying a type sigil) into a
/// QBE-safe name.
pub fn il_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    for ch in name.chars() {
        match ch {
            '%' => out.push_str("_i"),
            '&' => out.push_str("_l"),
            '!' => out.push_str("_f"),
            '#' => out.push_str("_d"),
            '$' => out.push_str("_s"),
            '@' => out.push_str("_y"),
            '^' => out.push_str("_h"),
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

/// Renders literal text as QBE data items, keeping printable runs as
/// quoted strings and escaping the rest byte by byte.
fn data_bytes(text: &str) -> String {
    let mut items: Vec<String> = Vec::new();
    let mut run = String::new();
    for byte in text.bytes() {
        let printable = (0x20..0x7f).contains(&byte) && byte != b'"' && byte != b'\\';
        if printable {
            run.push(byte as char);
        } else {
            if !run.is_empty() {
                items.push(format!("b \"{run}\""));
                run.clear();
            }
            items.push(format!("b {byte}"));
        }
    }
    if !run.is_empty() {
        items.push(format!("b \"{run}\""));
    }
    if items.is_empty() {
        items.push("b \"\"".to_string());
    }
    items.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_il_name_sigils() {
        assert_eq!(il_name("COUNT"), "COUNT");
        assert_eq!(il_name("N%"), "N_i");
        assert_eq!(il_name("TESTDIV&"), "TESTDIV_l");
        assert_eq!(il_name("S$"), "S_s");
        assert_eq!(il_name("X#"), "X_d");
    }

    #[test]
    fn test_data_bytes_escaping() {
        assert_eq!(data_bytes("hi"), "b \"hi\"");
        assert_eq!(data_bytes("a\"b"), "b \"a\", b 34, b \"b\"");
        assert_eq!(data_bytes(""), "b \"\"");
        assert_eq!(data_bytes("é"), "b 195, b 169");
    }
}
