use crate::analyzer::FunctionInfo;
use crate::analyzer::VariableInfo;
use crate::ast::BinaryOperator;
use crate::ast::Expression;
use crate::ast::UnaryOperator;
use crate::emitter::EmitError;
use crate::emitter::FuncEmitter;
use crate::emitter::Value;
use crate::runtime::abi;
use crate::runtime::abi::array_desc;
use crate::runtime::abi::string_desc;
use crate::types::BaseType;
use crate::types::Coercion;
use crate::types::TypeDescriptor;
use crate::types::TypeError;
use crate::types::ValueClass;
use crate::diagnostics::SourceLoc;

impl FuncEmitter<'_, '_> {
    /// Evaluates an expression, returning the operand and its type.
    pub fn emit_expr(&mut self, expr: &Expression, loc: SourceLoc) -> Result<Value, EmitError> {
        match expr {
            Expression::IntLiteral(n) => Ok(Value::new(
                n.to_string(),
                TypeDescriptor::infer_int_literal(*n),
            )),
            Expression::FloatLiteral(x) => {
                let ty = TypeDescriptor::infer_float_literal(*x);
                let repr = match ty.base {
                    BaseType::Single => format!("s_{:?}", *x as f32),
                    _ => format!("d_{:?}", x),
                };
                Ok(Value::new(repr, ty))
            }
            Expression::StringLiteral(text) => {
                let sym = self.em.intern_string(text);
                let t = self.tmp();
                self.push(format!(
                    "{t} =l call ${}(l {sym})",
                    abi::string::NEW_UTF8
                ));
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(value)
            }
            Expression::Variable(name) => self.read_variable(name, loc),
            Expression::Call { name, args } => self.emit_call(name, args, loc),
            Expression::Member { .. } => {
                let (addr, ty) = self.expr_address(expr, loc)?;
                Ok(self.load_from(&addr, &ty))
            }
            Expression::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs, loc),
            Expression::Unary { op, operand } => self.emit_unary(*op, operand, loc),
            Expression::Iif {
                cond,
                then_value,
                else_value,
            } => self.emit_iif(cond, then_value, else_value, loc),
        }
    }

    // ---- variables and addresses -----------------------------------------

    /// Address of a variable's storage. For globals this is an offset into
    /// the globals vector; for BYREF parameters the stored pointer; for
    /// globally stored UDTs the heap pointer held in the slot.
    pub fn var_address(&mut self, info: &VariableInfo) -> String {
        if let Some(slot) = info.global_slot {
            let t = self.tmp();
            self.push(format!(
                "{t} =l add %gb, {}",
                slot as u64 * abi::GLOBAL_SLOT_SIZE
            ));
            if info.ty.base == BaseType::UserDefined {
                let p = self.tmp();
                self.push(format!("{p} =l loadl {t}"));
                return p;
            }
            return t;
        }
        if info.byref {
            let t = self.tmp();
            self.push(format!("{t} =l loadl {}", self.slot_name(&info.name)));
            return t;
        }
        self.slot_name(&info.name)
    }

    pub fn read_variable(&mut self, name: &str, loc: SourceLoc) -> Result<Value, EmitError> {
        let info = self
            .scope_lookup(name)
            .cloned()
            .ok_or_else(|| EmitError::UnknownVariable {
                loc,
                name: name.to_string(),
            })?;
        let addr = self.var_address(&info);
        if info.ty.base == BaseType::UserDefined && !info.ty.is_array() {
            // aggregates are handled by address
            return Ok(Value::new(addr, info.ty));
        }
        Ok(self.load_from(&addr, &info.ty))
    }

    pub fn load_from(&mut self, addr: &str, ty: &TypeDescriptor) -> Value {
        let t = self.tmp();
        self.push(format!(
            "{t} ={} load{} {addr}",
            ty.value_class(),
            ty.mem_op()
        ));
        Value::new(t, ty.clone())
    }

    /// Address and type of an addressable expression (UDT member chains,
    /// array elements). Used for member reads and BYREF arguments.
    pub fn expr_address(
        &mut self,
        expr: &Expression,
        loc: SourceLoc,
    ) -> Result<(String, TypeDescriptor), EmitError> {
        match expr {
            Expression::Variable(name) => {
                let info = self.scope_lookup(name).cloned().ok_or_else(|| {
                    EmitError::UnknownVariable {
                        loc,
                        name: name.to_string(),
                    }
                })?;
                let addr = self.var_address(&info);
                Ok((addr, info.ty))
            }
            Expression::Call { name, args } => {
                let info = self.scope_lookup(name).cloned().ok_or_else(|| {
                    EmitError::UnknownVariable {
                        loc,
                        name: name.to_string(),
                    }
                })?;
                if !info.ty.is_array() {
                    return Err(EmitError::NotAnArray {
                        loc,
                        name: name.to_string(),
                    });
                }
                self.array_element_addr(&info, args, loc)
            }
            Expression::Member { base, field } => {
                let (base_addr, base_ty) = self.expr_address(base, loc)?;
                self.member_addr(&base_addr, &base_ty, field, loc)
            }
            _ => Err(EmitError::Unsupported {
                loc,
                what: "taking the address of a temporary".to_string(),
            }),
        }
    }

    /// `base + offset` of a UDT field.
    pub fn member_addr(
        &mut self,
        base_addr: &str,
        base_ty: &TypeDescriptor,
        field: &str,
        loc: SourceLoc,
    ) -> Result<(String, TypeDescriptor), EmitError> {
        let udt = base_ty
            .udt
            .as_ref()
            .and_then(|u| self.em.symbols.udt_by_id(u.id))
            .ok_or_else(|| EmitError::Unsupported {
                loc,
                what: format!("member access on {base_ty}"),
            })?;
        let Some(f) = udt.field(field) else {
            return Err(EmitError::UnknownVariable {
                loc,
                name: format!("{}.{}", udt.name, field),
            });
        };
        let addr = self.tmp();
        self.push(format!("{addr} =l add {base_addr}, {}", f.offset));
        Ok((addr, f.ty.clone()))
    }

    /// Element address: flatten indices (via descriptor strides beyond the
    /// first dimension), bounds-check, then `data + flat * elem_size`.
    pub fn array_element_addr(
        &mut self,
        info: &VariableInfo,
        indices: &[Expression],
        loc: SourceLoc,
    ) -> Result<(String, TypeDescriptor), EmitError> {
        if indices.is_empty() {
            return Err(EmitError::Unsupported {
                loc,
                what: format!("indexing {} without indices", info.name),
            });
        }
        let elem_ty = info
            .ty
            .element_type()
            .cloned()
            .unwrap_or_else(TypeDescriptor::integer);
        let elem_size = info.ty.element_size_bytes();

        let slot = self.var_address(info);
        let desc = self.tmp();
        self.push(format!("{desc} =l loadl {slot}"));

        // flat index: the single index directly, or the stride-weighted
        // sum over every dimension for higher ranks
        let flat = if indices.len() == 1 {
            let v = self.emit_expr(&indices[0], loc)?;
            self.coerce_value(v, &TypeDescriptor::long(), loc)?.repr
        } else {
            let mut acc: Option<String> = None;
            for (d, index) in indices.iter().enumerate() {
                let v = self.emit_expr(index, loc)?;
                let v = self.coerce_value(v, &TypeDescriptor::long(), loc)?;
                let stride_addr = self.tmp();
                self.push(format!(
                    "{stride_addr} =l add {desc}, {}",
                    array_desc::DIMS + d as u64 * array_desc::DIM_SIZE + array_desc::DIM_STRIDE
                ));
                let stride = self.tmp();
                self.push(format!("{stride} =l loadl {stride_addr}"));
                let scaled = self.tmp();
                self.push(format!("{scaled} =l mul {}, {stride}", v.repr));
                acc = Some(match acc {
                    Some(prev) => {
                        let next = self.tmp();
                        self.push(format!("{next} =l add {prev}, {scaled}"));
                        next
                    }
                    None => scaled,
                });
            }
            acc.expect("at least one index")
        };

        self.push(format!(
            "call ${}(l {desc}, l {flat})",
            abi::array::BOUNDS_CHECK
        ));
        let data = self.tmp();
        self.push(format!("{data} =l loadl {desc}"));
        let off = self.tmp();
        self.push(format!("{off} =l mul {flat}, {elem_size}"));
        let addr = self.tmp();
        self.push(format!("{addr} =l add {data}, {off}"));
        Ok((addr, elem_ty))
    }

    // ---- coercion --------------------------------------------------------

    /// Applies the coercion rules, emitting conversion instructions and a
    /// warning for lossy narrowing. ExplicitRequired is a hard error.
    pub fn coerce_value(
        &mut self,
        value: Value,
        to: &TypeDescriptor,
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        match value.ty.coerce_to(to) {
            Coercion::Identical => Ok(value),
            Coercion::ImplicitSafe => Ok(self.convert(value, to)),
            Coercion::ImplicitLossy { via } => {
                self.em.diags.warn(
                    Some(loc),
                    format!(
                        "lossy conversion from {} to {} ({} would make it explicit)",
                        value.ty, to, via
                    ),
                );
                Ok(self.convert(value, to))
            }
            Coercion::ExplicitRequired { via } => Err(EmitError::Type {
                loc,
                source: TypeError::ExplicitConversionRequired {
                    from: value.ty.to_string(),
                    to: to.to_string(),
                    via,
                },
            }),
            Coercion::Incompatible => Err(EmitError::Type {
                loc,
                source: TypeError::Incompatible {
                    from: value.ty.to_string(),
                    to: to.to_string(),
                },
            }),
        }
    }

    /// Representation change between numeric classes (never fails; callers
    /// have already ruled on legality).
    pub fn convert(&mut self, value: Value, to: &TypeDescriptor) -> Value {
        let from_class = value.ty.value_class();
        let to_class = to.value_class();
        if value.ty.is_string() && to.is_string() {
            return Value {
                repr: value.repr,
                ty: to.clone(),
                owned_string: value.owned_string,
            };
        }
        let unsigned = value.ty.base.is_unsigned();
        if from_class == to_class {
            // sub-word narrowing keeps the temporary canonical
            let repr = match (to.base, from_class) {
                (BaseType::Byte, ValueClass::Word) => self.unop("extsb", "w", &value.repr),
                (BaseType::UByte, ValueClass::Word) => self.unop("extub", "w", &value.repr),
                (BaseType::Short, ValueClass::Word) => self.unop("extsh", "w", &value.repr),
                (BaseType::UShort, ValueClass::Word) => self.unop("extuh", "w", &value.repr),
                _ => value.repr.clone(),
            };
            return Value::new(repr, to.clone());
        }
        let repr = match (from_class, to_class) {
            (ValueClass::Word, ValueClass::Long) => {
                let op = if unsigned { "extuw" } else { "extsw" };
                self.unop(op, "l", &value.repr)
            }
            (ValueClass::Long, ValueClass::Word) => self.unop("copy", "w", &value.repr),
            (ValueClass::Word, ValueClass::Single) => {
                let op = if unsigned { "uwtof" } else { "swtof" };
                self.unop(op, "s", &value.repr)
            }
            (ValueClass::Word, ValueClass::Double) => {
                let op = if unsigned { "uwtof" } else { "swtof" };
                self.unop(op, "d", &value.repr)
            }
            (ValueClass::Long, ValueClass::Single) => {
                let op = if unsigned { "ultof" } else { "sltof" };
                self.unop(op, "s", &value.repr)
            }
            (ValueClass::Long, ValueClass::Double) => {
                let op = if unsigned { "ultof" } else { "sltof" };
                self.unop(op, "d", &value.repr)
            }
            (ValueClass::Single, ValueClass::Double) => self.unop("exts", "d", &value.repr),
            (ValueClass::Double, ValueClass::Single) => self.unop("truncd", "s", &value.repr),
            (ValueClass::Single, ValueClass::Word) => self.unop("stosi", "w", &value.repr),
            (ValueClass::Single, ValueClass::Long) => self.unop("stosi", "l", &value.repr),
            (ValueClass::Double, ValueClass::Word) => self.unop("dtosi", "w", &value.repr),
            (ValueClass::Double, ValueClass::Long) => self.unop("dtosi", "l", &value.repr),
            _ => unreachable!("equal value classes returned early"),
        };
        Value::new(repr, to.clone())
    }

    fn unop(&mut self, op: &str, class: &str, operand: &str) -> String {
        let t = self.tmp();
        self.push(format!("{t} ={class} {op} {operand}"));
        t
    }

    /// Condition value for `jnz`: a 32-bit zero/nonzero temporary.
    pub fn emit_condition_value(&mut self, value: Value) -> String {
        match value.ty.value_class() {
            ValueClass::Word => value.repr,
            ValueClass::Long => self.binop_w("cnel", &value.repr, "0"),
            ValueClass::Single => self.binop_w("cnes", &value.repr, "s_0"),
            ValueClass::Double => self.binop_w("cned", &value.repr, "d_0"),
        }
    }

    fn binop_w(&mut self, op: &str, a: &str, b: &str) -> String {
        let t = self.tmp();
        self.push(format!("{t} =w {op} {a}, {b}"));
        t
    }

    // ---- operators -------------------------------------------------------

    fn emit_binary(
        &mut self,
        op: BinaryOperator,
        lhs: &Expression,
        rhs: &Expression,
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        let lv = self.emit_expr(lhs, loc)?;
        let rv = self.emit_expr(rhs, loc)?;
        let common = lv.ty.promote(&rv.ty);

        if common.is_string() {
            return self.emit_string_binary(op, lv, rv, &common, loc);
        }

        // bitwise and shifts force an integer shape
        let common = if op.is_bitwise() && common.base.is_float() {
            TypeDescriptor::long()
        } else if op == BinaryOperator::IntDivide && common.base.is_float() {
            TypeDescriptor::long()
        } else {
            common
        };

        let mismatch = || EmitError::Type {
            loc,
            source: TypeError::OperatorMismatch {
                op: op.to_string(),
                lhs: lv.ty.to_string(),
                rhs: rv.ty.to_string(),
            },
        };
        if !lv.ty.is_numeric() || !rv.ty.is_numeric() {
            return Err(mismatch());
        }

        // float operands feeding an integer-only operator are truncated
        let a = self.convert(lv.clone(), &common);
        let b = self.convert(rv.clone(), &common);
        let class = common.value_class();
        let unsigned = common.attrs.is_unsigned;

        if op.is_comparison() {
            let opcode = cmp_opcode(op, class, unsigned);
            let t = self.binop_w(&opcode, &a.repr, &b.repr);
            return Ok(Value::new(t, TypeDescriptor::integer()));
        }

        let t = match op {
            BinaryOperator::Add => self.binop(class, "add", &a.repr, &b.repr),
            BinaryOperator::Subtract => self.binop(class, "sub", &a.repr, &b.repr),
            BinaryOperator::Multiply => self.binop(class, "mul", &a.repr, &b.repr),
            BinaryOperator::Divide => {
                if class.is_float() {
                    self.binop(class, "div", &a.repr, &b.repr)
                } else if unsigned {
                    self.binop(class, "udiv", &a.repr, &b.repr)
                } else {
                    self.binop(class, "div", &a.repr, &b.repr)
                }
            }
            BinaryOperator::IntDivide => {
                return Ok(Value::new(
                    self.emit_int_divide(&a, &b, rhs, &common),
                    common,
                ));
            }
            BinaryOperator::Modulo => {
                if class.is_float() {
                    let t = self.tmp();
                    self.push(format!(
                        "{t} =d call ${}(d {}, d {})",
                        abi::math::FMOD,
                        a.repr,
                        b.repr
                    ));
                    return Ok(Value::new(t, TypeDescriptor::double()));
                } else if unsigned {
                    self.binop(class, "urem", &a.repr, &b.repr)
                } else {
                    self.binop(class, "rem", &a.repr, &b.repr)
                }
            }
            BinaryOperator::And => self.binop(class, "and", &a.repr, &b.repr),
            BinaryOperator::Or => self.binop(class, "or", &a.repr, &b.repr),
            BinaryOperator::Xor => self.binop(class, "xor", &a.repr, &b.repr),
            BinaryOperator::ShiftLeft => self.binop(class, "shl", &a.repr, &b.repr),
            BinaryOperator::ShiftRight => {
                let opcode = if unsigned { "shr" } else { "sar" };
                self.binop(class, opcode, &a.repr, &b.repr)
            }
            _ => unreachable!("comparisons handled above"),
        };
        Ok(Value::new(t, common))
    }

    fn binop(&mut self, class: ValueClass, op: &str, a: &str, b: &str) -> String {
        let t = self.tmp();
        self.push(format!("{t} ={class} {op} {a}, {b}"));
        t
    }

    /// `\` integer division. A constant power-of-two divisor lowers to a
    /// shift with a negative-dividend adjustment so the result still
    /// rounds toward zero (-7 \ 2 = -3, not -4).
    fn emit_int_divide(
        &mut self,
        a: &Value,
        b: &Value,
        rhs_expr: &Expression,
        common: &TypeDescriptor,
    ) -> String {
        let class = common.value_class();
        let unsigned = common.attrs.is_unsigned;
        if let Some(divisor) = const_int(rhs_expr) {
            if divisor > 1 && (divisor as u64).is_power_of_two() {
                let k = divisor.trailing_zeros();
                if unsigned {
                    return self.binop(class, "shr", &a.repr, &k.to_string());
                }
                let sign_bits = match class {
                    ValueClass::Long => 63,
                    _ => 31,
                };
                let sign = self.binop(class, "sar", &a.repr, &sign_bits.to_string());
                let mask = self.binop(class, "and", &sign, &(divisor - 1).to_string());
                let adjusted = self.binop(class, "add", &a.repr, &mask);
                return self.binop(class, "sar", &adjusted, &k.to_string());
            }
        }
        let opcode = if unsigned { "udiv" } else { "div" };
        self.binop(class, opcode, &a.repr, &b.repr)
    }

    fn emit_string_binary(
        &mut self,
        op: BinaryOperator,
        lv: Value,
        rv: Value,
        common: &TypeDescriptor,
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        let a = self.coerce_value(lv, common, loc)?;
        let b = self.coerce_value(rv, common, loc)?;
        match op {
            BinaryOperator::Add => {
                let t = self.tmp();
                self.push(format!(
                    "{t} =l call ${}(l {}, l {})",
                    abi::string::CONCAT,
                    a.repr,
                    b.repr
                ));
                let value = Value::owned(t, common.clone());
                self.track_string(&value);
                Ok(value)
            }
            op if op.is_comparison() => {
                let c = self.tmp();
                self.push(format!(
                    "{c} =w call ${}(l {}, l {})",
                    abi::string::COMPARE,
                    a.repr,
                    b.repr
                ));
                let opcode = cmp_opcode(op, ValueClass::Word, false);
                let t = self.binop_w(&opcode, &c, "0");
                Ok(Value::new(t, TypeDescriptor::integer()))
            }
            _ => Err(EmitError::Type {
                loc,
                source: TypeError::OperatorMismatch {
                    op: op.to_string(),
                    lhs: a.ty.to_string(),
                    rhs: b.ty.to_string(),
                },
            }),
        }
    }

    fn emit_unary(
        &mut self,
        op: UnaryOperator,
        operand: &Expression,
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        let value = self.emit_expr(operand, loc)?;
        match op {
            UnaryOperator::Plus => Ok(value),
            UnaryOperator::Negate => {
                let class = value.ty.value_class();
                let t = self.unop("neg", &class.to_string(), &value.repr);
                Ok(Value::new(t, value.ty))
            }
            UnaryOperator::Not => {
                let v = self.convert(value, &TypeDescriptor::integer());
                let t = self.binop_w("xor", &v.repr, "-1");
                Ok(Value::new(t, TypeDescriptor::integer()))
            }
        }
    }

    /// Short-circuit two-way select. The untaken arm is never evaluated.
    fn emit_iif(
        &mut self,
        cond: &Expression,
        then_value: &Expression,
        else_value: &Expression,
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        // the result type comes from both arms without evaluating either
        let result_ty = {
            let then_ty = self.peek_type(then_value, loc);
            let else_ty = self.peek_type(else_value, loc);
            then_ty.promote(&else_ty)
        };
        let (size, op) = (result_ty.size_bytes().max(4), result_ty.mem_op());
        let slot = self.tmp();
        let align = if size > 4 { 8 } else { 4 };
        self.push(format!("{slot} =l alloc{align} {size}"));

        let true_label = self.fresh_label("iif_true");
        let false_label = self.fresh_label("iif_false");
        let end_label = self.fresh_label("iif_end");

        let cv = self.emit_expr(cond, loc)?;
        let c = self.emit_condition_value(cv);
        self.push(format!("jnz {c}, {true_label}, {false_label}"));

        self.push_label(&true_label);
        let tv = self.emit_expr(then_value, loc)?;
        let tv = self.coerce_value(tv, &result_ty, loc)?;
        self.transfer_string_ownership(&tv);
        self.push(format!("store{} {}, {slot}", op.store_suffix(), tv.repr));
        self.push(format!("jmp {end_label}"));

        self.push_label(&false_label);
        let ev = self.emit_expr(else_value, loc)?;
        let ev = self.coerce_value(ev, &result_ty, loc)?;
        self.transfer_string_ownership(&ev);
        self.push(format!("store{} {}, {slot}", op.store_suffix(), ev.repr));
        self.push(format!("jmp {end_label}"));

        self.push_label(&end_label);
        let result = self.load_from(&slot, &result_ty);
        if result_ty.is_string() {
            let owned = Value::owned(result.repr.clone(), result_ty);
            self.track_string(&owned);
            return Ok(owned);
        }
        Ok(result)
    }

    /// Makes a string value safe to outlive the current statement: an
    /// owned temporary hands its reference over, a borrowed one takes an
    /// extra retain. Numeric values pass through untouched.
    pub fn transfer_string_ownership(&mut self, value: &Value) {
        if !value.ty.is_string() {
            return;
        }
        if value.owned_string {
            self.untrack_string(value);
        } else {
            self.push(format!(
                "call ${}(l {})",
                abi::string::RETAIN,
                value.repr
            ));
        }
    }

    /// Type of an expression without emitting code for it; used by IIF to
    /// size its result slot.
    fn peek_type(&self, expr: &Expression, loc: SourceLoc) -> TypeDescriptor {
        match expr {
            Expression::IntLiteral(n) => TypeDescriptor::infer_int_literal(*n),
            Expression::FloatLiteral(x) => TypeDescriptor::infer_float_literal(*x),
            Expression::StringLiteral(_) => TypeDescriptor::string(),
            Expression::Variable(name) => self
                .scope_lookup(name)
                .map(|i| i.ty.clone())
                .unwrap_or_else(TypeDescriptor::unknown),
            Expression::Call { name, args } => {
                if let Some(info) = self.scope_lookup(name) {
                    if info.ty.is_array() {
                        return info
                            .ty
                            .element_type()
                            .cloned()
                            .unwrap_or_else(TypeDescriptor::integer);
                    }
                    if info.ty.is_string() {
                        return TypeDescriptor::integer();
                    }
                }
                if let Some(func) = self.em.symbols.function(name) {
                    return func.return_type.clone();
                }
                builtin_return_type(name, args.len()).unwrap_or_else(TypeDescriptor::unknown)
            }
            Expression::Member { base, field } => {
                let base_ty = self.peek_type(base, loc);
                base_ty
                    .udt
                    .as_ref()
                    .and_then(|u| self.em.symbols.udt_by_id(u.id))
                    .and_then(|udt| udt.field(field))
                    .map(|f| f.ty.clone())
                    .unwrap_or_else(TypeDescriptor::unknown)
            }
            Expression::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    return TypeDescriptor::integer();
                }
                self.peek_type(lhs, loc).promote(&self.peek_type(rhs, loc))
            }
            Expression::Unary { op, operand } => match op {
                UnaryOperator::Not => TypeDescriptor::integer(),
                _ => self.peek_type(operand, loc),
            },
            Expression::Iif {
                then_value,
                else_value,
                ..
            } => self
                .peek_type(then_value, loc)
                .promote(&self.peek_type(else_value, loc)),
        }
    }

    // ---- calls -----------------------------------------------------------

    fn emit_call(
        &mut self,
        name: &str,
        args: &[Expression],
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        // array element or string character read
        if let Some(info) = self.scope_lookup(name).cloned() {
            if info.ty.is_array() {
                let (addr, elem_ty) = self.array_element_addr(&info, args, loc)?;
                return Ok(self.load_from(&addr, &elem_ty));
            }
            if info.ty.is_string() && args.len() == 1 {
                let desc = self.read_variable(name, loc)?;
                let idx = self.emit_expr(&args[0], loc)?;
                let idx = self.coerce_value(idx, &TypeDescriptor::long(), loc)?;
                let t = self.tmp();
                self.push(format!(
                    "{t} =w call ${}(l {}, l {})",
                    abi::string::GET_CHAR_AT,
                    desc.repr,
                    idx.repr
                ));
                return Ok(Value::new(t, TypeDescriptor::integer()));
            }
        }
        if let Some(func) = self.em.symbols.function(name).cloned() {
            return self.emit_user_call(&func, args, loc);
        }
        if let Some(value) = self.emit_builtin(name, args, loc)? {
            return Ok(value);
        }
        Err(EmitError::UnknownCallee {
            loc,
            name: name.to_string(),
        })
    }

    pub fn emit_user_call(
        &mut self,
        func: &FunctionInfo,
        args: &[Expression],
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        if args.len() != func.params.len() {
            return Err(EmitError::Unsupported {
                loc,
                what: format!(
                    "calling {} with {} arguments (takes {})",
                    func.name,
                    args.len(),
                    func.params.len()
                ),
            });
        }
        let mut lowered = Vec::with_capacity(args.len());
        for (param, arg) in func.params.iter().zip(args) {
            if param.byref {
                let addr = match self.expr_address(arg, loc) {
                    Ok((addr, _)) => addr,
                    Err(_) => {
                        // materialize a temporary slot for a value argument
                        let value = self.emit_expr(arg, loc)?;
                        let value = self.coerce_value(value, &param.ty, loc)?;
                        let slot = self.tmp();
                        let size = param.ty.size_bytes().max(4);
                        let align = if size > 4 { 8 } else { 4 };
                        self.push(format!("{slot} =l alloc{align} {size}"));
                        self.push(format!(
                            "store{} {}, {slot}",
                            param.ty.mem_op().store_suffix(),
                            value.repr
                        ));
                        slot
                    }
                };
                lowered.push(format!("l {addr}"));
            } else {
                let value = self.emit_expr(arg, loc)?;
                let value = self.coerce_value(value, &param.ty, loc)?;
                lowered.push(format!("{} {}", param.ty.value_class(), value.repr));
            }
        }
        let arg_list = lowered.join(", ");
        let callee = format!("${}", crate::emitter::il_name(&func.name));
        if func.return_type.is_void() {
            self.push(format!("call {callee}({arg_list})"));
            return Ok(Value::new("0", TypeDescriptor::void()));
        }
        let t = self.tmp();
        self.push(format!(
            "{t} ={} call {callee}({arg_list})",
            func.return_type.value_class()
        ));
        if func.return_type.is_string() {
            let value = Value::owned(t, func.return_type.clone());
            self.track_string(&value);
            return Ok(value);
        }
        Ok(Value::new(t, func.return_type.clone()))
    }

    // ---- builtins --------------------------------------------------------

    /// Intrinsics and runtime-library functions. Returns None when the
    /// name is not a builtin.
    pub fn emit_builtin(
        &mut self,
        name: &str,
        args: &[Expression],
        loc: SourceLoc,
    ) -> Result<Option<Value>, EmitError> {
        match name {
            "ABS" => {
                let v = self.arg(args, 0, loc)?;
                return Ok(Some(self.emit_abs(v)));
            }
            "SGN" => {
                let v = self.arg(args, 0, loc)?;
                return Ok(Some(self.emit_sgn(v)));
            }
            "LEN" => {
                let v = self.arg(args, 0, loc)?;
                if !v.ty.is_string() {
                    return Err(EmitError::Unsupported {
                        loc,
                        what: format!("LEN of {}", v.ty),
                    });
                }
                let addr = self.tmp();
                self.push(format!(
                    "{addr} =l add {}, {}",
                    v.repr,
                    string_desc::LENGTH
                ));
                let t = self.tmp();
                self.push(format!("{t} =l loadl {addr}"));
                return Ok(Some(Value::new(t, TypeDescriptor::long())));
            }
            "ASC" => {
                let v = self.arg(args, 0, loc)?;
                if !v.ty.is_string() {
                    return Err(EmitError::Unsupported {
                        loc,
                        what: format!("ASC of {}", v.ty),
                    });
                }
                return Ok(Some(self.emit_asc(&v)));
            }
            "INT" => {
                let v = self.arg_as(args, 0, &TypeDescriptor::double(), loc)?;
                let f = self.call_d1(abi::math::FLOOR, &v.repr);
                let t = self.unop("dtosi", "l", &f);
                return Ok(Some(Value::new(t, TypeDescriptor::long())));
            }
            "FIX" => {
                let v = self.arg_as(args, 0, &TypeDescriptor::double(), loc)?;
                let t = self.unop("dtosi", "l", &v.repr);
                return Ok(Some(Value::new(t, TypeDescriptor::long())));
            }
            "CINT" | "CLNG" | "CBYTE" | "CSHORT" => {
                let v = self.arg_as(args, 0, &TypeDescriptor::double(), loc)?;
                let r = self.call_d1(abi::math::ROUND, &v.repr);
                if name == "CLNG" {
                    let t = self.unop("dtosi", "l", &r);
                    return Ok(Some(Value::new(t, TypeDescriptor::long())));
                }
                let ty = match name {
                    "CBYTE" => TypeDescriptor::scalar(BaseType::Byte),
                    "CSHORT" => TypeDescriptor::scalar(BaseType::Short),
                    _ => TypeDescriptor::integer(),
                };
                let t = self.unop("dtosi", "w", &r);
                let narrowed = self.convert(Value::new(t, TypeDescriptor::integer()), &ty);
                return Ok(Some(narrowed));
            }
            "CSNG" => {
                let v = self.arg(args, 0, loc)?;
                return Ok(Some(self.convert(v, &TypeDescriptor::single())));
            }
            "CDBL" => {
                let v = self.arg(args, 0, loc)?;
                return Ok(Some(self.convert(v, &TypeDescriptor::double())));
            }
            "LBOUND" | "UBOUND" => {
                let v = self.arg(args, 0, loc)?;
                let dim = match args.get(1) {
                    Some(d) => {
                        let d = self.emit_expr(d, loc)?;
                        self.coerce_value(d, &TypeDescriptor::integer(), loc)?.repr
                    }
                    None => "1".to_string(),
                };
                let entry = if name == "LBOUND" {
                    abi::array::LBOUND
                } else {
                    abi::array::UBOUND
                };
                let t = self.tmp();
                self.push(format!("{t} =l call ${entry}(l {}, w {dim})", v.repr));
                return Ok(Some(Value::new(t, TypeDescriptor::long())));
            }
            "RND" => {
                let t = self.tmp();
                self.push(format!("{t} =d call ${}()", abi::math::RND));
                return Ok(Some(Value::new(t, TypeDescriptor::double())));
            }
            "TIMER" => {
                let t = self.tmp();
                self.push(format!("{t} =d call ${}()", abi::math::TIMER));
                return Ok(Some(Value::new(t, TypeDescriptor::double())));
            }
            _ => {}
        }

        if let Some(value) = self.emit_string_builtin(name, args, loc)? {
            return Ok(Some(value));
        }
        if let Some(entry) = double_math_entry(name) {
            let arity = math_arity(name);
            if args.len() != arity {
                return Err(EmitError::Unsupported {
                    loc,
                    what: format!("{name} with {} arguments", args.len()),
                });
            }
            let mut lowered = Vec::with_capacity(arity);
            for arg in args {
                let v = self.emit_expr(arg, loc)?;
                let v = self.coerce_value(v, &TypeDescriptor::double(), loc)?;
                lowered.push(format!("d {}", v.repr));
            }
            let t = self.tmp();
            self.push(format!("{t} =d call ${entry}({})", lowered.join(", ")));
            return Ok(Some(Value::new(t, TypeDescriptor::double())));
        }
        Ok(None)
    }

    fn emit_string_builtin(
        &mut self,
        name: &str,
        args: &[Expression],
        loc: SourceLoc,
    ) -> Result<Option<Value>, EmitError> {
        let entry_1s: Option<&str> = match name {
            "UCASE$" => Some(abi::string::UPPER),
            "LCASE$" => Some(abi::string::LOWER),
            "TRIM$" => Some(abi::string::TRIM),
            "LTRIM$" => Some(abi::string::LTRIM),
            "RTRIM$" => Some(abi::string::RTRIM),
            "REVERSE$" => Some(abi::string::REVERSE),
            _ => None,
        };
        if let Some(entry) = entry_1s {
            let v = self.arg(args, 0, loc)?;
            let t = self.tmp();
            self.push(format!("{t} =l call ${entry}(l {})", v.repr));
            let value = Value::owned(t, TypeDescriptor::string());
            self.track_string(&value);
            return Ok(Some(value));
        }
        match name {
            "CHR$" => {
                let v = self.arg_as(args, 0, &TypeDescriptor::integer(), loc)?;
                let t = self.tmp();
                self.push(format!("{t} =l call ${}(w {})", abi::string::CHR, v.repr));
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(Some(value))
            }
            "LEFT$" | "RIGHT$" => {
                let s = self.arg(args, 0, loc)?;
                let n = self.arg_as(args, 1, &TypeDescriptor::long(), loc)?;
                let entry = if name == "LEFT$" {
                    abi::string::LEFT
                } else {
                    abi::string::RIGHT
                };
                let t = self.tmp();
                self.push(format!("{t} =l call ${entry}(l {}, l {})", s.repr, n.repr));
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(Some(value))
            }
            "MID$" => {
                let s = self.arg(args, 0, loc)?;
                let start = self.arg_as(args, 1, &TypeDescriptor::long(), loc)?;
                let len = match args.get(2) {
                    Some(e) => {
                        let v = self.emit_expr(e, loc)?;
                        self.coerce_value(v, &TypeDescriptor::long(), loc)?.repr
                    }
                    None => "-1".to_string(),
                };
                let t = self.tmp();
                self.push(format!(
                    "{t} =l call ${}(l {}, l {}, l {len})",
                    abi::string::MID,
                    s.repr,
                    start.repr
                ));
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(Some(value))
            }
            "INSTR" => {
                let s = self.arg(args, 0, loc)?;
                let sub = self.arg(args, 1, loc)?;
                let t = self.tmp();
                self.push(format!(
                    "{t} =l call ${}(l {}, l {})",
                    abi::string::INSTR,
                    s.repr,
                    sub.repr
                ));
                Ok(Some(Value::new(t, TypeDescriptor::long())))
            }
            "REPLACE$" => {
                let s = self.arg(args, 0, loc)?;
                let from = self.arg(args, 1, loc)?;
                let to = self.arg(args, 2, loc)?;
                let t = self.tmp();
                self.push(format!(
                    "{t} =l call ${}(l {}, l {}, l {})",
                    abi::string::REPLACE,
                    s.repr,
                    from.repr,
                    to.repr
                ));
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(Some(value))
            }
            "SPACE$" => {
                let n = self.arg_as(args, 0, &TypeDescriptor::long(), loc)?;
                let t = self.tmp();
                self.push(format!(
                    "{t} =l call ${}(w 32, l {})",
                    abi::string::NEW_REPEAT,
                    n.repr
                ));
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(Some(value))
            }
            "STRING$" => {
                let n = self.arg_as(args, 0, &TypeDescriptor::long(), loc)?;
                let code = self.arg_as(args, 1, &TypeDescriptor::integer(), loc)?;
                let t = self.tmp();
                self.push(format!(
                    "{t} =l call ${}(w {}, l {})",
                    abi::string::NEW_REPEAT,
                    code.repr,
                    n.repr
                ));
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(Some(value))
            }
            "STR$" => {
                let v = self.arg(args, 0, loc)?;
                let t = self.tmp();
                if v.ty.value_class().is_float() {
                    let v = self.convert(v, &TypeDescriptor::double());
                    self.push(format!(
                        "{t} =l call ${}(d {})",
                        abi::string::FROM_DOUBLE,
                        v.repr
                    ));
                } else {
                    let v = self.convert(v, &TypeDescriptor::long());
                    self.push(format!(
                        "{t} =l call ${}(l {})",
                        abi::string::FROM_INT,
                        v.repr
                    ));
                }
                let value = Value::owned(t, TypeDescriptor::string());
                self.track_string(&value);
                Ok(Some(value))
            }
            "VAL" => {
                let s = self.arg(args, 0, loc)?;
                let t = self.tmp();
                self.push(format!(
                    "{t} =d call ${}(l {})",
                    abi::string::TO_DOUBLE,
                    s.repr
                ));
                Ok(Some(Value::new(t, TypeDescriptor::double())))
            }
            _ => Ok(None),
        }
    }

    /// `ABS` lowers inline: bit-mask for floats, branchless sign fold for
    /// integers.
    fn emit_abs(&mut self, v: Value) -> Value {
        match v.ty.value_class() {
            ValueClass::Double => {
                let bits = self.unop("cast", "l", &v.repr);
                let masked = self.binop(ValueClass::Long, "and", &bits, "9223372036854775807");
                let t = self.unop("cast", "d", &masked);
                Value::new(t, v.ty)
            }
            ValueClass::Single => {
                let bits = self.unop("cast", "w", &v.repr);
                let masked = self.binop(ValueClass::Word, "and", &bits, "2147483647");
                let t = self.unop("cast", "s", &masked);
                Value::new(t, v.ty)
            }
            class => {
                let bits = if class == ValueClass::Long { 63 } else { 31 };
                let sign = self.binop(class, "sar", &v.repr, &bits.to_string());
                let flipped = self.binop(class, "xor", &v.repr, &sign);
                let t = self.binop(class, "sub", &flipped, &sign);
                Value::new(t, v.ty)
            }
        }
    }

    /// `SGN` is branchless: (x > 0) - (x < 0).
    fn emit_sgn(&mut self, v: Value) -> Value {
        let (gt, lt, zero) = match v.ty.value_class() {
            ValueClass::Double => ("cgtd", "cltd", "d_0"),
            ValueClass::Single => ("cgts", "clts", "s_0"),
            ValueClass::Long => ("csgtl", "csltl", "0"),
            ValueClass::Word => ("csgtw", "csltw", "0"),
        };
        let a = self.binop_w(gt, &v.repr, zero);
        let b = self.binop_w(lt, &v.repr, zero);
        let t = self.binop_w("sub", &a, &b);
        Value::new(t, TypeDescriptor::integer())
    }

    /// `ASC` reads the first character directly from the descriptor,
    /// honoring the encoding byte; the empty string yields 0.
    fn emit_asc(&mut self, v: &Value) -> Value {
        let slot = self.tmp();
        self.push(format!("{slot} =l alloc4 4"));
        let zero_label = self.fresh_label("asc_zero");
        let load_label = self.fresh_label("asc_load");
        let wide_label = self.fresh_label("asc_wide");
        let narrow_label = self.fresh_label("asc_narrow");
        let end_label = self.fresh_label("asc_end");

        let len_addr = self.tmp();
        self.push(format!("{len_addr} =l add {}, {}", v.repr, string_desc::LENGTH));
        let len = self.tmp();
        self.push(format!("{len} =l loadl {len_addr}"));
        let empty = self.binop_w("ceql", &len, "0");
        self.push(format!("jnz {empty}, {zero_label}, {load_label}"));

        self.push_label(&zero_label);
        self.push(format!("storew 0, {slot}"));
        self.push(format!("jmp {end_label}"));

        self.push_label(&load_label);
        let enc_addr = self.tmp();
        self.push(format!(
            "{enc_addr} =l add {}, {}",
            v.repr,
            string_desc::ENCODING
        ));
        let enc = self.tmp();
        self.push(format!("{enc} =w loadub {enc_addr}"));
        let data = self.tmp();
        self.push(format!("{data} =l loadl {}", v.repr));
        self.push(format!("jnz {enc}, {wide_label}, {narrow_label}"));

        self.push_label(&wide_label);
        let wide = self.tmp();
        self.push(format!("{wide} =w loadw {data}"));
        self.push(format!("storew {wide}, {slot}"));
        self.push(format!("jmp {end_label}"));

        self.push_label(&narrow_label);
        let narrow = self.tmp();
        self.push(format!("{narrow} =w loadub {data}"));
        self.push(format!("storew {narrow}, {slot}"));
        self.push(format!("jmp {end_label}"));

        self.push_label(&end_label);
        let t = self.tmp();
        self.push(format!("{t} =w loadw {slot}"));
        Value::new(t, TypeDescriptor::integer())
    }

    fn call_d1(&mut self, entry: &str, arg: &str) -> String {
        let t = self.tmp();
        self.push(format!("{t} =d call ${entry}(d {arg})"));
        t
    }

    fn arg(&mut self, args: &[Expression], i: usize, loc: SourceLoc) -> Result<Value, EmitError> {
        let Some(expr) = args.get(i) else {
            return Err(EmitError::Unsupported {
                loc,
                what: format!("missing argument {}", i + 1),
            });
        };
        self.emit_expr(expr, loc)
    }

    fn arg_as(
        &mut self,
        args: &[Expression],
        i: usize,
        ty: &TypeDescriptor,
        loc: SourceLoc,
    ) -> Result<Value, EmitError> {
        let v = self.arg(args, i, loc)?;
        self.coerce_value(v, ty, loc)
    }
}

fn cmp_opcode(op: BinaryOperator, class: ValueClass, unsigned: bool) -> String {
    let class_ch = class.to_string();
    if class.is_float() {
        let stem = match op {
            BinaryOperator::Equal => "eq",
            BinaryOperator::NotEqual => "ne",
            BinaryOperator::Less => "lt",
            BinaryOperator::LessEqual => "le",
            BinaryOperator::Greater => "gt",
            BinaryOperator::GreaterEqual => "ge",
            _ => unreachable!("not a comparison"),
        };
        return format!("c{stem}{class_ch}");
    }
    let stem = match op {
        BinaryOperator::Equal => "eq".to_string(),
        BinaryOperator::NotEqual => "ne".to_string(),
        BinaryOperator::Less => format!("{}lt", if unsigned { "u" } else { "s" }),
        BinaryOperator::LessEqual => format!("{}le", if unsigned { "u" } else { "s" }),
        BinaryOperator::Greater => format!("{}gt", if unsigned { "u" } else { "s" }),
        BinaryOperator::GreaterEqual => format!("{}ge", if unsigned { "u" } else { "s" }),
        _ => unreachable!("not a comparison"),
    };
    format!("c{stem}{class_ch}")
}

fn const_int(expr: &Expression) -> Option<i64> {
    match expr {
        Expression::IntLiteral(n) => Some(*n),
        Expression::Unary {
            op: UnaryOperator::Negate,
            operand,
        } => const_int(operand).map(|n| -n),
        _ => None,
    }
}

fn double_math_entry(name: &str) -> Option<&'static str> {
    Some(match name {
        "SIN" => abi::math::SIN,
        "COS" => abi::math::COS,
        "TAN" => abi::math::TAN,
        "ASIN" => abi::math::ASIN,
        "ACOS" => abi::math::ACOS,
        "ATN" => abi::math::ATN,
        "ATAN2" => abi::math::ATAN2,
        "SINH" => abi::math::SINH,
        "COSH" => abi::math::COSH,
        "TANH" => abi::math::TANH,
        "LOG" => abi::math::LOG,
        "LOG2" => abi::math::LOG2,
        "LOG10" => abi::math::LOG10,
        "EXP" => abi::math::EXP,
        "SQR" => abi::math::SQR,
        "POW" => abi::math::POW,
        "ROUND" => abi::math::ROUND,
        "GAMMA" => abi::math::GAMMA,
        "FACT" => abi::math::FACT,
        "COMB" => abi::math::COMB,
        "PERM" => abi::math::PERM,
        "NORMPDF" => abi::math::NORMAL_PDF,
        "NORMCDF" => abi::math::NORMAL_CDF,
        "CLAMP" => abi::math::CLAMP,
        "PMT" => abi::math::PMT,
        "PV" => abi::math::PV,
        "FV" => abi::math::FV,
        _ => return None,
    })
}

fn math_arity(name: &str) -> usize {
    match name {
        "ATAN2" | "POW" | "COMB" | "PERM" | "FMOD" => 2,
        "CLAMP" | "PMT" | "PV" | "FV" => 3,
        _ => 1,
    }
}

/// Result types of builtins, for IIF arm typing without emission.
fn builtin_return_type(name: &str, _arity: usize) -> Option<TypeDescriptor> {
    match name {
        "LEN" | "INSTR" | "LBOUND" | "UBOUND" | "INT" | "FIX" | "CLNG" => {
            Some(TypeDescriptor::long())
        }
        "ASC" | "SGN" | "CINT" | "CBYTE" | "CSHORT" => Some(TypeDescriptor::integer()),
        "CSNG" => Some(TypeDescriptor::single()),
        "VAL" | "CDBL" | "RND" | "TIMER" => Some(TypeDescriptor::double()),
        name if name.ends_with('$') => Some(TypeDescriptor::string()),
        name if double_math_entry(name).is_some() => Some(TypeDescriptor::double()),
        "ABS" => None,
        _ => None,
    }
}
