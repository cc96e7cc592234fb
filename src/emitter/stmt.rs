use std::rc::Rc;

use log::debug;

use crate::ast::Expression;
use crate::ast::LValue;
use crate::ast::PrintSep;
use crate::ast::Statement;
use crate::ast::StatementKind;
use crate::ast::VarDecl;
use crate::cfg::BasicBlock;
use crate::cfg::EdgeKind;
use crate::diagnostics::SourceLoc;
use crate::emitter::EmitError;
use crate::emitter::FuncEmitter;
use crate::emitter::Value;
use crate::runtime::abi;
use crate::types::BaseType;
use crate::types::TypeDescriptor;
use crate::types::ValueClass;

impl FuncEmitter<'_, '_> {
    pub fn emit_statement(&mut self, statement: &Rc<Statement>) -> Result<(), EmitError> {
        let loc = statement.loc;
        match &statement.kind {
            StatementKind::Let { target, value } => self.emit_let(target, value, loc)?,
            StatementKind::Dim { decls } => {
                for decl in decls {
                    self.emit_dim(decl, loc)?;
                }
            }
            StatementKind::Global { decls } => {
                for decl in decls {
                    self.emit_global_decl(decl, loc)?;
                }
            }
            StatementKind::Redim {
                preserve,
                name,
                bounds,
            } => self.emit_redim(*preserve, name, bounds, loc)?,
            StatementKind::Print { items } => self.emit_print(items, loc)?,
            StatementKind::Input { prompt, targets } => self.emit_input(prompt, targets, loc)?,
            StatementKind::Read { targets } => self.emit_read(targets, loc)?,
            StatementKind::Restore { target } => self.emit_restore(*target, loc),
            StatementKind::Call { name, args } => self.emit_call_statement(name, args, loc)?,
            StatementKind::Shared { .. }
            | StatementKind::Label(_)
            | StatementKind::Data { .. }
            | StatementKind::TypeDecl { .. }
            | StatementKind::Function { .. }
            | StatementKind::Sub { .. }
            | StatementKind::DefFn { .. }
            | StatementKind::OnEvent { .. } => {}
            other => {
                // control statements are always the last statement of a
                // block and flow through emit_branching instead
                debug!("non-emitting statement {} in block body", other.keyword());
            }
        }
        self.release_string_temps();
        Ok(())
    }

    // ---- assignment ------------------------------------------------------

    fn emit_let(
        &mut self,
        target: &LValue,
        value: &Expression,
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        // indexed write into a string: the runtime handles bounds checking
        // and in-place promotion to UTF-32 for code points >= 128
        if let LValue::Index { name, indices } = target {
            if let Some(info) = self.scope_lookup(name).cloned() {
                if info.ty.is_string() && indices.len() == 1 {
                    let desc = self.read_variable(name, loc)?;
                    let idx = self.emit_expr(&indices[0], loc)?;
                    let idx = self.coerce_value(idx, &TypeDescriptor::long(), loc)?;
                    let code = self.emit_expr(value, loc)?;
                    let code = self.coerce_value(code, &TypeDescriptor::integer(), loc)?;
                    self.push(format!(
                        "call ${}(l {}, l {}, w {})",
                        abi::string::SET_CHAR_AT,
                        desc.repr,
                        idx.repr,
                        code.repr
                    ));
                    return Ok(());
                }
            }
        }

        let v = self.emit_expr(value, loc)?;
        let (addr, ty) = self.lvalue_address(target, loc)?;

        if ty.base == BaseType::UserDefined && !ty.is_array() {
            return self.copy_udt(&addr, &v, &ty, loc);
        }

        let v = self.coerce_value(v, &ty, loc)?;
        if ty.is_string() {
            let old = self.tmp();
            self.push(format!("{old} =l loadl {addr}"));
            self.push(format!("call ${}(l {old})", abi::string::RELEASE));
            // the statement's reference transfers to the variable, or a
            // borrowed one is retained
            self.transfer_string_ownership(&v);
            self.push(format!("storel {}, {addr}", v.repr));
            return Ok(());
        }
        self.push(format!(
            "store{} {}, {addr}",
            ty.mem_op().store_suffix(),
            v.repr
        ));
        Ok(())
    }

    /// Whole-record assignment between same-id UDTs: a field-blind byte
    /// copy in 8-byte chunks with a small tail.
    fn copy_udt(
        &mut self,
        dest: &str,
        source: &Value,
        ty: &TypeDescriptor,
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        if source.ty != *ty {
            return Err(EmitError::Type {
                loc,
                source: crate::types::TypeError::Incompatible {
                    from: source.ty.to_string(),
                    to: ty.to_string(),
                },
            });
        }
        let udt = ty
            .udt
            .as_ref()
            .and_then(|u| self.em.symbols.udt_by_id(u.id))
            .expect("assigning a registered UDT");
        let size = udt.size;
        let mut off = 0;
        while off + 8 <= size {
            let (s, d) = (self.tmp(), self.tmp());
            self.push(format!("{s} =l add {}, {off}", source.repr));
            self.push(format!("{d} =l add {dest}, {off}"));
            let t = self.tmp();
            self.push(format!("{t} =l loadl {s}"));
            self.push(format!("storel {t}, {d}"));
            off += 8;
        }
        while off < size {
            let (s, d) = (self.tmp(), self.tmp());
            self.push(format!("{s} =l add {}, {off}", source.repr));
            self.push(format!("{d} =l add {dest}, {off}"));
            let t = self.tmp();
            self.push(format!("{t} =w loadub {s}"));
            self.push(format!("storeb {t}, {d}"));
            off += 1;
        }
        Ok(())
    }

    /// Address and type of an assignment target.
    fn lvalue_address(
        &mut self,
        target: &LValue,
        loc: SourceLoc,
    ) -> Result<(String, TypeDescriptor), EmitError> {
        match target {
            LValue::Variable(name) => {
                let info = self.scope_lookup(name).cloned().ok_or_else(|| {
                    EmitError::UnknownVariable {
                        loc,
                        name: name.clone(),
                    }
                })?;
                let addr = self.var_address(&info);
                Ok((addr, info.ty))
            }
            LValue::Index { name, indices } => {
                let info = self.scope_lookup(name).cloned().ok_or_else(|| {
                    EmitError::UnknownVariable {
                        loc,
                        name: name.clone(),
                    }
                })?;
                if !info.ty.is_array() {
                    return Err(EmitError::NotAnArray {
                        loc,
                        name: name.clone(),
                    });
                }
                self.array_element_addr(&info, indices, loc)
            }
            LValue::Member { base, field } => {
                let (base_addr, base_ty) = self.lvalue_address(base, loc)?;
                self.member_addr(&base_addr, &base_ty, field, loc)
            }
        }
    }

    /// Stores an already-evaluated value into a named variable; used for
    /// catch variables and loop plumbing.
    pub fn store_variable(
        &mut self,
        name: &str,
        value: Value,
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        let (addr, ty) = self.lvalue_address(&LValue::Variable(name.to_string()), loc)?;
        let v = self.coerce_value(value, &ty, loc)?;
        self.push(format!(
            "store{} {}, {addr}",
            ty.mem_op().store_suffix(),
            v.repr
        ));
        Ok(())
    }

    // ---- declarations ----------------------------------------------------

    fn emit_dim(&mut self, decl: &VarDecl, loc: SourceLoc) -> Result<(), EmitError> {
        if decl.bounds.is_empty() {
            // scalars already have their zeroed stack slot
            return Ok(());
        }
        let info = self
            .scope_lookup(&decl.name)
            .cloned()
            .ok_or_else(|| EmitError::UnknownVariable {
                loc,
                name: decl.name.clone(),
            })?;
        let slot = self.var_address(&info);
        let desc = self.emit_array_new(&info.ty, &decl.bounds, loc)?;
        self.push(format!("storel {desc}, {slot}"));
        Ok(())
    }

    fn emit_global_decl(&mut self, decl: &VarDecl, loc: SourceLoc) -> Result<(), EmitError> {
        let info = self
            .scope_lookup(&decl.name)
            .cloned()
            .ok_or_else(|| EmitError::UnknownVariable {
                loc,
                name: decl.name.clone(),
            })?;
        let slot = info.global_slot.expect("GLOBAL declarations carry a slot");
        if !decl.bounds.is_empty() {
            let addr = self.tmp();
            self.push(format!(
                "{addr} =l add %gb, {}",
                slot as u64 * abi::GLOBAL_SLOT_SIZE
            ));
            let desc = self.emit_array_new(&info.ty, &decl.bounds, loc)?;
            self.push(format!("storel {desc}, {addr}"));
            return Ok(());
        }
        if info.ty.base == BaseType::UserDefined {
            let udt = info
                .ty
                .udt
                .as_ref()
                .and_then(|u| self.em.symbols.udt_by_id(u.id))
                .expect("declaring a registered UDT");
            let addr = self.tmp();
            self.push(format!(
                "{addr} =l add %gb, {}",
                slot as u64 * abi::GLOBAL_SLOT_SIZE
            ));
            let p = self.tmp();
            self.push(format!(
                "{p} =l call ${}(l {})",
                abi::rt::ARENA_ALLOC,
                udt.size
            ));
            self.push(format!("storel {p}, {addr}"));
        }
        // plain scalars live in the zero-initialized slot itself
        Ok(())
    }

    fn emit_array_new(
        &mut self,
        ty: &TypeDescriptor,
        bounds: &[Expression],
        loc: SourceLoc,
    ) -> Result<String, EmitError> {
        let elem_size = ty.element_size_bytes();
        let tag = element_tag(ty);
        if bounds.len() == 1 {
            let upper = self.emit_expr(&bounds[0], loc)?;
            let upper = self.coerce_value(upper, &TypeDescriptor::long(), loc)?;
            let desc = self.tmp();
            self.push(format!(
                "{desc} =l call ${}(l {elem_size}, l 0, l {}, w {tag})",
                abi::array::NEW,
                upper.repr
            ));
            return Ok(desc);
        }
        // higher ranks pass their upper bounds through a stack vector
        let exts = self.tmp();
        self.push(format!("{exts} =l alloc8 {}", bounds.len() * 8));
        for (i, bound) in bounds.iter().enumerate() {
            let v = self.emit_expr(bound, loc)?;
            let v = self.coerce_value(v, &TypeDescriptor::long(), loc)?;
            let addr = self.tmp();
            self.push(format!("{addr} =l add {exts}, {}", i * 8));
            self.push(format!("storel {}, {addr}", v.repr));
        }
        let desc = self.tmp();
        self.push(format!(
            "{desc} =l call ${}(l {elem_size}, w {}, l {exts}, w {tag})",
            abi::array::NEW_MULTI,
            bounds.len()
        ));
        Ok(desc)
    }

    fn emit_redim(
        &mut self,
        preserve: bool,
        name: &str,
        bounds: &[Expression],
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        let info = self
            .scope_lookup(name)
            .cloned()
            .ok_or_else(|| EmitError::UnknownVariable {
                loc,
                name: name.to_string(),
            })?;
        if !info.ty.is_array() {
            return Err(EmitError::NotAnArray {
                loc,
                name: name.to_string(),
            });
        }
        if bounds.is_empty() {
            return Err(EmitError::Unsupported {
                loc,
                what: "REDIM without bounds".to_string(),
            });
        }
        if preserve {
            self.em
                .diags
                .warn(Some(loc), "REDIM PRESERVE is reported by the runtime");
        }
        let slot = self.var_address(&info);
        let upper = self.emit_expr(&bounds[0], loc)?;
        let upper = self.coerce_value(upper, &TypeDescriptor::long(), loc)?;
        if bounds.len() > 1 {
            return Err(EmitError::Unsupported {
                loc,
                what: "REDIM of a multi-dimensional array".to_string(),
            });
        }
        self.push(format!(
            "call ${}(l {slot}, l {}, l {}, w {})",
            abi::array::REDIM,
            info.ty.element_size_bytes(),
            upper.repr,
            u8::from(preserve)
        ));
        Ok(())
    }

    // ---- I/O -------------------------------------------------------------

    fn emit_print(
        &mut self,
        items: &[crate::ast::PrintItem],
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        if items.is_empty() {
            self.push(format!("call ${}()", abi::io::PRINT_NEWLINE));
            return Ok(());
        }
        for item in items {
            let v = self.emit_expr(&item.expr, loc)?;
            if v.ty.is_string() {
                self.push(format!(
                    "call ${}(l {})",
                    abi::io::PRINT_STRING,
                    v.repr
                ));
            } else {
                match v.ty.value_class() {
                    ValueClass::Word => {
                        self.push(format!("call ${}(w {})", abi::io::PRINT_INT, v.repr))
                    }
                    ValueClass::Long => {
                        self.push(format!("call ${}(l {})", abi::io::PRINT_LONG, v.repr))
                    }
                    ValueClass::Single => {
                        self.push(format!("call ${}(s {})", abi::io::PRINT_FLOAT, v.repr))
                    }
                    ValueClass::Double => {
                        self.push(format!("call ${}(d {})", abi::io::PRINT_DOUBLE, v.repr))
                    }
                }
            }
            match item.sep {
                Some(PrintSep::Comma) => {
                    self.push(format!("call ${}()", abi::io::PRINT_TAB));
                }
                Some(PrintSep::Semicolon) => {}
                None => {
                    self.push(format!("call ${}()", abi::io::PRINT_NEWLINE));
                }
            }
        }
        Ok(())
    }

    fn emit_input(
        &mut self,
        prompt: &Option<String>,
        targets: &[LValue],
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        if let Some(text) = prompt {
            let sym = self.em.intern_string(text);
            self.push(format!("call ${}(l {sym})", abi::io::INPUT_PROMPT));
        }
        for target in targets {
            let (addr, ty) = self.lvalue_address(target, loc)?;
            if ty.is_string() {
                let t = self.tmp();
                self.push(format!("{t} =l call ${}()", abi::io::INPUT_STRING));
                let old = self.tmp();
                self.push(format!("{old} =l loadl {addr}"));
                self.push(format!("call ${}(l {old})", abi::string::RELEASE));
                self.push(format!("storel {t}, {addr}"));
                continue;
            }
            let value = if ty.value_class().is_float() {
                let t = self.tmp();
                self.push(format!("{t} =d call ${}()", abi::io::INPUT_DOUBLE));
                Value::new(t, TypeDescriptor::double())
            } else {
                let t = self.tmp();
                self.push(format!("{t} =l call ${}()", abi::io::INPUT_INT));
                Value::new(t, TypeDescriptor::long())
            };
            let value = self.convert(value, &ty);
            self.push(format!(
                "store{} {}, {addr}",
                ty.mem_op().store_suffix(),
                value.repr
            ));
        }
        Ok(())
    }

    fn emit_read(&mut self, targets: &[LValue], loc: SourceLoc) -> Result<(), EmitError> {
        for target in targets {
            let (addr, ty) = self.lvalue_address(target, loc)?;
            if ty.is_string() {
                let t = self.tmp();
                self.push(format!("{t} =l call ${}()", abi::data::READ_STRING));
                let old = self.tmp();
                self.push(format!("{old} =l loadl {addr}"));
                self.push(format!("call ${}(l {old})", abi::string::RELEASE));
                self.push(format!("storel {t}, {addr}"));
                continue;
            }
            let value = if ty.value_class().is_float() {
                let t = self.tmp();
                self.push(format!("{t} =d call ${}()", abi::data::READ_DOUBLE));
                Value::new(t, TypeDescriptor::double())
            } else {
                let t = self.tmp();
                self.push(format!("{t} =l call ${}()", abi::data::READ_INT));
                Value::new(t, TypeDescriptor::long())
            };
            let value = self.convert(value, &ty);
            self.push(format!(
                "store{} {}, {addr}",
                ty.mem_op().store_suffix(),
                value.repr
            ));
        }
        Ok(())
    }

    fn emit_restore(&mut self, target: Option<u32>, loc: SourceLoc) {
        match target {
            None => self.push(format!("call ${}()", abi::data::RESTORE_START)),
            Some(line) => {
                let index = match self.em.symbols.data_index_for_line(line) {
                    Some(index) => index,
                    None => {
                        self.em.diags.warn(
                            Some(loc),
                            format!("RESTORE {line} points past the last DATA entry"),
                        );
                        self.em.symbols.data.len()
                    }
                };
                self.push(format!("call ${}(w {index})", abi::data::RESTORE));
            }
        }
    }

    fn emit_call_statement(
        &mut self,
        name: &str,
        args: &[Expression],
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        if let Some(func) = self.em.symbols.function(name).cloned() {
            // a discarded string result stays tracked and is released at
            // statement end
            self.emit_user_call(&func, args, loc)?;
            return Ok(());
        }
        match name {
            "CLS" => {
                self.push(format!("call ${}()", abi::io::CLS));
                Ok(())
            }
            "RANDOMIZE" => {
                let seed = match args.first() {
                    Some(e) => {
                        let v = self.emit_expr(e, loc)?;
                        self.coerce_value(v, &TypeDescriptor::double(), loc)?.repr
                    }
                    None => "d_0".to_string(),
                };
                self.push(format!("call ${}(d {seed})", abi::math::RANDOMIZE));
                Ok(())
            }
            "PRINTAT" => {
                if args.len() != 3 {
                    return Err(EmitError::Unsupported {
                        loc,
                        what: format!("PRINTAT with {} arguments", args.len()),
                    });
                }
                let row = self.emit_expr(&args[0], loc)?;
                let row = self.coerce_value(row, &TypeDescriptor::integer(), loc)?;
                let col = self.emit_expr(&args[1], loc)?;
                let col = self.coerce_value(col, &TypeDescriptor::integer(), loc)?;
                let s = self.emit_expr(&args[2], loc)?;
                self.push(format!(
                    "call ${}(w {}, w {}, l {})",
                    abi::io::PRINT_AT,
                    row.repr,
                    col.repr,
                    s.repr
                ));
                Ok(())
            }
            "ERASE" => {
                let (addr, ty) = match args.first() {
                    Some(Expression::Variable(array)) => {
                        self.lvalue_address(&LValue::Variable(array.clone()), loc)?
                    }
                    _ => {
                        return Err(EmitError::Unsupported {
                            loc,
                            what: "ERASE without an array name".to_string(),
                        });
                    }
                };
                if !ty.is_array() {
                    return Err(EmitError::NotAnArray {
                        loc,
                        name: "ERASE target".to_string(),
                    });
                }
                let desc = self.tmp();
                self.push(format!("{desc} =l loadl {addr}"));
                self.push(format!("call ${}(l {desc})", abi::array::ERASE));
                Ok(())
            }
            _ => {
                if self.emit_builtin(name, args, loc)?.is_some() {
                    return Ok(());
                }
                Err(EmitError::UnknownCallee {
                    loc,
                    name: name.to_string(),
                })
            }
        }
    }

    // ---- branching statements --------------------------------------------

    /// Emits the control transfer that ends a block, using the block's
    /// typed edges for the targets.
    pub fn emit_branching(
        &mut self,
        statement: &Rc<Statement>,
        block: &BasicBlock,
    ) -> Result<(), EmitError> {
        let cfg = self.cfg.expect("branch emission needs a CFG");
        let loc = statement.loc;
        match &statement.kind {
            StatementKind::If { cond, .. } | StatementKind::IfGoto { cond, .. } => {
                let v = self.emit_expr(cond, loc)?;
                let c = self.emit_condition_value(v);
                self.release_string_temps();
                let (true_to, false_to) = self.cond_targets(block)?;
                self.push(format!(
                    "jnz {c}, {}, {}",
                    self.block_label(true_to),
                    self.block_label(false_to)
                ));
            }
            StatementKind::Goto { .. } => {
                let edge = cfg
                    .edges_from(block.id)
                    .find(|e| e.kind == EdgeKind::Jump)
                    .ok_or(EmitError::MissingTerminator { block: block.id })?;
                let to = edge.to;
                self.push(format!("jmp {}", self.block_label(to)));
            }
            StatementKind::Gosub { .. } => {
                let call = cfg
                    .edges_from(block.id)
                    .find(|e| e.kind == EdgeKind::Call)
                    .ok_or(EmitError::MissingTerminator { block: block.id })?
                    .to;
                let ret = cfg
                    .edges_from(block.id)
                    .find(|e| e.kind == EdgeKind::Unconditional)
                    .ok_or(EmitError::MissingTerminator { block: block.id })?
                    .to;
                self.push(format!("call ${}(w {ret})", abi::gosub::PUSH));
                self.push(format!("jmp {}", self.block_label(call)));
            }
            StatementKind::Return { value } => {
                self.emit_return(value.as_ref(), block, loc)?;
            }
            StatementKind::OnGoto { selector, .. } => {
                self.emit_on_dispatch(selector, block, false, loc)?;
            }
            StatementKind::OnGosub { selector, .. } => {
                self.emit_on_dispatch(selector, block, true, loc)?;
            }
            StatementKind::Exit { .. } | StatementKind::Continue | StatementKind::End => {
                if matches!(statement.kind, StatementKind::End) && self.func.is_some() {
                    // END inside a procedure still ends the whole program
                    self.push(format!("call ${}()", abi::rt::CLEANUP));
                    self.push("call $exit(w 0)");
                }
                let to = block
                    .successors
                    .first()
                    .copied()
                    .ok_or(EmitError::MissingTerminator { block: block.id })?;
                self.push(format!("jmp {}", self.block_label(to)));
            }
            StatementKind::Throw { value } => {
                let code = match value {
                    Some(e) => {
                        let v = self.emit_expr(e, loc)?;
                        self.coerce_value(v, &TypeDescriptor::integer(), loc)?.repr
                    }
                    None => "0".to_string(),
                };
                self.push(format!("call ${}(w {code})", abi::error::SET));
                self.release_string_temps();
                let jump = cfg.edges_from(block.id).find(|e| e.kind == EdgeKind::Jump);
                match jump {
                    Some(edge) => {
                        let to = edge.to;
                        self.push(format!("jmp {}", self.block_label(to)));
                    }
                    None => {
                        // no TRY in scope: report and die
                        let line = loc.basic_line.unwrap_or(loc.line);
                        let msg = self.em.intern_string("unhandled exception");
                        self.push(format!(
                            "call ${}(w {line}, l {msg})",
                            abi::rt::ERROR
                        ));
                        let to = block
                            .successors
                            .first()
                            .copied()
                            .unwrap_or(cfg.exit);
                        self.push(format!("jmp {}", self.block_label(to)));
                    }
                }
            }
            other => {
                debug!("statement {} reached branch emission", other.keyword());
                return Err(EmitError::MissingTerminator { block: block.id });
            }
        }
        Ok(())
    }

    fn cond_targets(&self, block: &BasicBlock) -> Result<(usize, usize), EmitError> {
        let cfg = self.cfg.expect("branch emission needs a CFG");
        let true_to = cfg
            .edge_labeled(block.id, "true")
            .ok_or(EmitError::MissingTerminator { block: block.id })?
            .to;
        let false_to = cfg
            .edge_labeled(block.id, "false")
            .ok_or(EmitError::MissingTerminator { block: block.id })?
            .to;
        Ok((true_to, false_to))
    }

    fn emit_return(
        &mut self,
        value: Option<&Expression>,
        block: &BasicBlock,
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        let cfg = self.cfg.expect("branch emission needs a CFG");
        if let Some(func) = self.func {
            let func_name = func.name.clone();
            if let Some(expr) = value {
                let v = self.emit_expr(expr, loc)?;
                let ret_ty = func.return_type.clone();
                let v = self.coerce_value(v, &ret_ty, loc)?;
                self.transfer_string_ownership(&v);
                let slot = self.slot_name(&func_name);
                self.push(format!(
                    "store{} {}, {slot}",
                    ret_ty.mem_op().store_suffix(),
                    v.repr
                ));
            }
            self.release_string_temps();
            self.push(format!("jmp {}", self.block_label(cfg.exit)));
            return Ok(());
        }

        // GOSUB return: pop the return stack and dispatch over every
        // recorded return point
        let id = self.tmp();
        self.push(format!("{id} =w call ${}()", abi::gosub::POP));
        let return_points = cfg.gosub_return_points.clone();
        for point in return_points {
            let hit = self.tmp();
            self.push(format!("{hit} =w ceqw {id}, {point}"));
            let next = self.fresh_label("ret_chk");
            self.push(format!(
                "jnz {hit}, {}, {next}",
                self.block_label(point)
            ));
            self.push_label(&next);
        }
        // unmatched id: the runtime already degraded underflow to exit
        self.push(format!("jmp {}", self.block_label(cfg.exit)));
        Ok(())
    }

    /// `ON n GOTO/GOSUB`: chained equality tests against 1..k, with the
    /// default edge taken for anything out of range.
    fn emit_on_dispatch(
        &mut self,
        selector: &Expression,
        block: &BasicBlock,
        is_gosub: bool,
        loc: SourceLoc,
    ) -> Result<(), EmitError> {
        let cfg = self.cfg.expect("branch emission needs a CFG");
        let v = self.emit_expr(selector, loc)?;
        let v = self.coerce_value(v, &TypeDescriptor::integer(), loc)?;
        self.release_string_temps();

        let expected_kind = if is_gosub {
            EdgeKind::Call
        } else {
            EdgeKind::Conditional
        };
        let mut targets = Vec::new();
        let mut k = 1;
        while let Some(edge) = cfg
            .edges_from(block.id)
            .find(|e| e.kind == expected_kind && e.label == format!("case_{k}"))
        {
            targets.push(edge.to);
            k += 1;
        }
        let default_to = if is_gosub {
            cfg.edges_from(block.id)
                .find(|e| e.kind == EdgeKind::Unconditional)
                .map(|e| e.to)
        } else {
            cfg.edges_from(block.id)
                .find(|e| e.label == "default")
                .map(|e| e.to)
        }
        .ok_or(EmitError::MissingTerminator { block: block.id })?;

        let ret_point = default_to;
        for (i, target) in targets.iter().enumerate() {
            let hit = self.tmp();
            self.push(format!("{hit} =w ceqw {}, {}", v.repr, i + 1));
            let next = self.fresh_label("on_chk");
            if is_gosub {
                let call_label = self.fresh_label("on_call");
                self.push(format!("jnz {hit}, {call_label}, {next}"));
                self.push_label(&call_label);
                self.push(format!("call ${}(w {ret_point})", abi::gosub::PUSH));
                self.push(format!("jmp {}", self.block_label(*target)));
            } else {
                self.push(format!(
                    "jnz {hit}, {}, {next}",
                    self.block_label(*target)
                ));
            }
            self.push_label(&next);
        }
        self.push(format!("jmp {}", self.block_label(default_to)));
        Ok(())
    }
}

/// Byte tag describing an array's element representation, stored in the
/// descriptor for the runtime's typed accessors.
fn element_tag(ty: &TypeDescriptor) -> u8 {
    let suffix = ty
        .element_type()
        .map(|e| e.mem_op().store_suffix())
        .unwrap_or("l");
    suffix.as_bytes()[0]
}
