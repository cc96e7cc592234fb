use core::fmt;
use core::fmt::Display;

use strum::Display as StrumDisplay;
use thiserror::Error;

pub type UdtId = u32;

/// Closed set of value types the compiler manipulates. Internal tags
/// (POINTER, ARRAY_DESC, STRING_DESC, LOOP_INDEX) never appear in source
/// programs; they exist so descriptor-typed temporaries and promoted loop
/// counters flow through the same machinery as user types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay)]
pub enum BaseType {
    #[strum(serialize = "BYTE")]
    Byte,
    #[strum(serialize = "UBYTE")]
    UByte,
    #[strum(serialize = "SHORT")]
    Short,
    #[strum(serialize = "USHORT")]
    UShort,
    #[strum(serialize = "INTEGER")]
    Integer,
    #[strum(serialize = "UINTEGER")]
    UInteger,
    #[strum(serialize = "LONG")]
    Long,
    #[strum(serialize = "ULONG")]
    ULong,
    #[strum(serialize = "SINGLE")]
    Single,
    #[strum(serialize = "DOUBLE")]
    Double,
    #[strum(serialize = "STRING")]
    String,
    #[strum(serialize = "UNICODE")]
    Unicode,
    #[strum(serialize = "USER_DEFINED")]
    UserDefined,
    #[strum(serialize = "POINTER")]
    Pointer,
    #[strum(serialize = "ARRAY_DESC")]
    ArrayDesc,
    #[strum(serialize = "STRING_DESC")]
    StringDesc,
    #[strum(serialize = "LOOP_INDEX")]
    LoopIndex,
    #[strum(serialize = "VOID")]
    Void,
    #[strum(serialize = "UNKNOWN")]
    Unknown,
}

impl BaseType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            BaseType::Byte
                | BaseType::UByte
                | BaseType::Short
                | BaseType::UShort
                | BaseType::Integer
                | BaseType::UInteger
                | BaseType::Long
                | BaseType::ULong
                | BaseType::LoopIndex
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            BaseType::UByte | BaseType::UShort | BaseType::UInteger | BaseType::ULong
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, BaseType::Single | BaseType::Double)
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self,
            BaseType::String | BaseType::Unicode | BaseType::StringDesc
        )
    }

    pub fn is_pointer_sized(&self) -> bool {
        matches!(
            self,
            BaseType::String
                | BaseType::Unicode
                | BaseType::UserDefined
                | BaseType::Pointer
                | BaseType::ArrayDesc
                | BaseType::StringDesc
        )
    }

    /// Integer width rank used by promotion; higher rank wins.
    fn rank(&self) -> u8 {
        match self {
            BaseType::Byte | BaseType::UByte => 1,
            BaseType::Short | BaseType::UShort => 2,
            BaseType::Integer | BaseType::UInteger => 3,
            BaseType::Long | BaseType::ULong | BaseType::LoopIndex => 4,
            _ => 0,
        }
    }

    /// The signed integer type of the same width.
    fn signed_variant(&self) -> BaseType {
        match self {
            BaseType::UByte => BaseType::Byte,
            BaseType::UShort => BaseType::Short,
            BaseType::UInteger => BaseType::Integer,
            BaseType::ULong => BaseType::Long,
            other => *other,
        }
    }
}

/// Attribute set carried next to the base tag. Plain copyable flags; the
/// distinction between DYNAMIC_ARRAY and STATIC_ARRAY only matters for DIM
/// lowering and REDIM checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeAttributes {
    pub is_array: bool,
    pub is_pointer: bool,
    pub is_const: bool,
    pub is_byref: bool,
    pub is_unsigned: bool,
    pub dynamic_array: bool,
    pub static_array: bool,
    pub is_hidden: bool,
}

/// Named user-defined type reference. Equality between UDT descriptors is
/// nominal on `id`; `name` is carried for diagnostics and IL type names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdtRef {
    pub id: UdtId,
    pub name: String,
}

/// Full description of a value type: base tag, attributes, and the
/// extended fields used by UDTs and arrays. The IL-level classification
/// (value class, memory op) is derived, never stored.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub base: BaseType,
    pub attrs: TypeAttributes,
    pub udt: Option<UdtRef>,
    /// element type when `attrs.is_array`
    pub element: Option<Box<TypeDescriptor>>,
    /// declared extent per dimension, -1 for dynamic; empty for scalars
    pub extents: Vec<i64>,
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        if self.attrs.is_array != other.attrs.is_array {
            return false;
        }
        if self.attrs.is_array {
            // array dimensions do not affect equality
            return match (&self.element, &other.element) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                _ => false,
            };
        }
        if self.base != other.base {
            return false;
        }
        if self.base == BaseType::UserDefined {
            return match (&self.udt, &other.udt) {
                (Some(a), Some(b)) => a.id == b.id,
                _ => false,
            };
        }
        true
    }
}

impl Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attrs.is_array {
            if let Some(elem) = &self.element {
                return write!(f, "{elem}()");
            }
            return write!(f, "ARRAY");
        }
        match (&self.base, &self.udt) {
            (BaseType::UserDefined, Some(udt)) => write!(f, "{}", udt.name),
            (base, _) => write!(f, "{base}"),
        }
    }
}

/// QBE base type used for temporaries holding a value of some type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum ValueClass {
    #[strum(serialize = "w")]
    Word,
    #[strum(serialize = "l")]
    Long,
    #[strum(serialize = "s")]
    Single,
    #[strum(serialize = "d")]
    Double,
}

impl ValueClass {
    pub fn is_float(&self) -> bool {
        matches!(self, ValueClass::Single | ValueClass::Double)
    }
}

/// Memory-access suffix selecting width and extension at load/store sites.
/// Loads of sub-word types extend into a word register (`loadsb`, `loaduh`,
/// ...); the corresponding stores drop the sign distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum MemOp {
    #[strum(serialize = "sb")]
    SignedByte,
    #[strum(serialize = "ub")]
    UnsignedByte,
    #[strum(serialize = "sh")]
    SignedHalf,
    #[strum(serialize = "uh")]
    UnsignedHalf,
    #[strum(serialize = "w")]
    Word,
    #[strum(serialize = "l")]
    Long,
    #[strum(serialize = "s")]
    Single,
    #[strum(serialize = "d")]
    Double,
}

impl MemOp {
    /// Suffix for store instructions, where byte/half stores carry no sign.
    pub fn store_suffix(&self) -> &'static str {
        match self {
            MemOp::SignedByte | MemOp::UnsignedByte => "b",
            MemOp::SignedHalf | MemOp::UnsignedHalf => "h",
            MemOp::Word => "w",
            MemOp::Long => "l",
            MemOp::Single => "s",
            MemOp::Double => "d",
        }
    }
}

/// Outcome of asking whether a value of one type may flow into a slot of
/// another. Lossy coercions carry the conversion the emitter should apply
/// (and warn about); ExplicitRequired names the BASIC function the user
/// must call themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coercion {
    Identical,
    ImplicitSafe,
    ImplicitLossy { via: &'static str },
    ExplicitRequired { via: &'static str },
    Incompatible,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("operator {op} cannot be applied to {lhs} and {rhs}")]
    OperatorMismatch {
        op: String,
        lhs: String,
        rhs: String,
    },
    #[error("cannot convert {from} to {to} implicitly; use {via}")]
    ExplicitConversionRequired {
        from: String,
        to: String,
        via: &'static str,
    },
    #[error("incompatible types {from} and {to}")]
    Incompatible { from: String, to: String },
}

impl TypeDescriptor {
    pub fn scalar(base: BaseType) -> Self {
        let attrs = TypeAttributes {
            is_unsigned: base.is_unsigned(),
            ..TypeAttributes::default()
        };
        TypeDescriptor {
            base,
            attrs,
            udt: None,
            element: None,
            extents: Vec::new(),
        }
    }

    pub fn integer() -> Self {
        Self::scalar(BaseType::Integer)
    }

    pub fn long() -> Self {
        Self::scalar(BaseType::Long)
    }

    pub fn single() -> Self {
        Self::scalar(BaseType::Single)
    }

    pub fn double() -> Self {
        Self::scalar(BaseType::Double)
    }

    pub fn string() -> Self {
        Self::scalar(BaseType::String)
    }

    pub fn void() -> Self {
        Self::scalar(BaseType::Void)
    }

    pub fn unknown() -> Self {
        Self::scalar(BaseType::Unknown)
    }

    pub fn loop_index() -> Self {
        Self::scalar(BaseType::LoopIndex)
    }

    pub fn user_defined(id: UdtId, name: impl Into<String>) -> Self {
        TypeDescriptor {
            base: BaseType::UserDefined,
            attrs: TypeAttributes::default(),
            udt: Some(UdtRef {
                id,
                name: name.into(),
            }),
            element: None,
            extents: Vec::new(),
        }
    }

    pub fn array_of(element: TypeDescriptor, extents: Vec<i64>) -> Self {
        let mut attrs = TypeAttributes {
            is_array: true,
            ..TypeAttributes::default()
        };
        if extents.iter().any(|e| *e < 0) || extents.is_empty() {
            attrs.dynamic_array = true;
        } else {
            attrs.static_array = true;
        }
        TypeDescriptor {
            base: BaseType::ArrayDesc,
            attrs,
            udt: None,
            element: Some(Box::new(element)),
            extents,
        }
    }

    pub fn byref(mut self) -> Self {
        self.attrs.is_byref = true;
        self
    }

    pub fn is_array(&self) -> bool {
        self.attrs.is_array
    }

    pub fn is_string(&self) -> bool {
        !self.attrs.is_array && self.base.is_string()
    }

    pub fn is_numeric(&self) -> bool {
        !self.attrs.is_array && (self.base.is_integer() || self.base.is_float())
    }

    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void
    }

    /// Maps a BASIC type-suffix sigil to its type.
    pub fn of_suffix(ch: char) -> Option<TypeDescriptor> {
        let base = match ch {
            '%' => BaseType::Integer,
            '&' => BaseType::Long,
            '!' => BaseType::Single,
            '#' => BaseType::Double,
            '$' => BaseType::String,
            '@' => BaseType::Byte,
            '^' => BaseType::Short,
            _ => return None,
        };
        Some(Self::scalar(base))
    }

    /// Maps an `AS` keyword to its type. Unsigned variants keep the same
    /// value-class bucket as their signed form and set IS_UNSIGNED.
    pub fn of_keyword(kw: &str) -> Option<TypeDescriptor> {
        let base = match kw.to_ascii_uppercase().as_str() {
            "BYTE" => BaseType::Byte,
            "UBYTE" => BaseType::UByte,
            "SHORT" => BaseType::Short,
            "USHORT" => BaseType::UShort,
            "INTEGER" => BaseType::Integer,
            "UINTEGER" => BaseType::UInteger,
            "LONG" => BaseType::Long,
            "ULONG" => BaseType::ULong,
            "SINGLE" => BaseType::Single,
            "DOUBLE" => BaseType::Double,
            "STRING" => BaseType::String,
            "UNICODE" => BaseType::Unicode,
            _ => return None,
        };
        Some(Self::scalar(base))
    }

    /// Narrowest signed integer type containing `value`.
    pub fn infer_int_literal(value: i64) -> TypeDescriptor {
        let base = if (-128..=127).contains(&value) {
            BaseType::Byte
        } else if (-32_768..=32_767).contains(&value) {
            BaseType::Short
        } else if (-2_147_483_648..=2_147_483_647).contains(&value) {
            BaseType::Integer
        } else {
            BaseType::Long
        };
        Self::scalar(base)
    }

    /// Floating literals default to SINGLE unless the magnitude escapes
    /// finite binary32.
    pub fn infer_float_literal(value: f64) -> TypeDescriptor {
        if value.is_finite() && (value as f32).is_infinite() {
            Self::double()
        } else {
            Self::single()
        }
    }

    /// Common type of a binary operation over `self` and `other`.
    pub fn promote(&self, other: &TypeDescriptor) -> TypeDescriptor {
        // string touches are contagious
        if self.is_string() || other.is_string() {
            if self.base == BaseType::Unicode || other.base == BaseType::Unicode {
                return Self::scalar(BaseType::Unicode);
            }
            return Self::string();
        }
        // float beats integer, double beats single
        if self.base == BaseType::Double || other.base == BaseType::Double {
            return Self::double();
        }
        if self.base == BaseType::Single || other.base == BaseType::Single {
            return Self::single();
        }
        // integer against integer: higher rank wins; equal rank with mixed
        // signedness promotes to the signed variant
        let (a, b) = (self.base, other.base);
        if a.rank() > b.rank() {
            return Self::scalar(a);
        }
        if b.rank() > a.rank() {
            return Self::scalar(b);
        }
        if a == b {
            return Self::scalar(a);
        }
        Self::scalar(a.signed_variant())
    }

    /// Classifies the conversion from `self` into a slot of type `to`.
    pub fn coerce_to(&self, to: &TypeDescriptor) -> Coercion {
        if self.attrs.is_array != to.attrs.is_array {
            return Coercion::Incompatible;
        }
        if self == to {
            return Coercion::Identical;
        }
        if self.attrs.is_array {
            // element types differ (dims were already ignored by equality)
            return Coercion::Incompatible;
        }
        if self.base == BaseType::UserDefined || to.base == BaseType::UserDefined {
            // nominal equality already failed above
            return Coercion::Incompatible;
        }

        let from_str = self.base.is_string();
        let to_str = to.base.is_string();
        if from_str && to_str {
            // ASCII/UTF-32 strings share one descriptor form at runtime
            return Coercion::ImplicitSafe;
        }
        if from_str != to_str {
            let via = if from_str { "VAL" } else { "STR$" };
            return Coercion::ExplicitRequired { via };
        }

        let from_int = self.base.is_integer();
        let to_int = to.base.is_integer();
        match (from_int, to_int) {
            (true, true) => {
                if self.base.rank() <= to.base.rank() {
                    Coercion::ImplicitSafe
                } else {
                    Coercion::ImplicitLossy {
                        via: narrow_conversion_name(to.base),
                    }
                }
            }
            (true, false) => {
                // integer into float; only a 64-bit source overflows the
                // single-precision mantissa
                if to.base == BaseType::Single && self.base.rank() >= BaseType::Long.rank() {
                    Coercion::ImplicitLossy { via: "CSNG" }
                } else {
                    Coercion::ImplicitSafe
                }
            }
            (false, true) => Coercion::ExplicitRequired {
                via: narrow_conversion_name(to.base),
            },
            (false, false) => {
                // float against float
                if self.base == BaseType::Single && to.base == BaseType::Double {
                    Coercion::ImplicitSafe
                } else {
                    Coercion::ImplicitLossy { via: "CSNG" }
                }
            }
        }
    }

    /// QBE register class for a temporary of this type.
    pub fn value_class(&self) -> ValueClass {
        if self.attrs.is_array {
            return ValueClass::Long;
        }
        match self.base {
            BaseType::Byte
            | BaseType::UByte
            | BaseType::Short
            | BaseType::UShort
            | BaseType::Integer
            | BaseType::UInteger => ValueClass::Word,
            BaseType::Long | BaseType::ULong | BaseType::LoopIndex => ValueClass::Long,
            BaseType::Single => ValueClass::Single,
            BaseType::Double => ValueClass::Double,
            _ => ValueClass::Long,
        }
    }

    /// Memory suffix used when loading or storing a value of this type.
    pub fn mem_op(&self) -> MemOp {
        if self.attrs.is_array {
            return MemOp::Long;
        }
        match self.base {
            BaseType::Byte => MemOp::SignedByte,
            BaseType::UByte => MemOp::UnsignedByte,
            BaseType::Short => MemOp::SignedHalf,
            BaseType::UShort => MemOp::UnsignedHalf,
            BaseType::Integer | BaseType::UInteger => MemOp::Word,
            BaseType::Long | BaseType::ULong | BaseType::LoopIndex => MemOp::Long,
            BaseType::Single => MemOp::Single,
            BaseType::Double => MemOp::Double,
            _ => MemOp::Long,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        if self.attrs.is_array {
            return 8;
        }
        match self.base {
            BaseType::Byte | BaseType::UByte => 1,
            BaseType::Short | BaseType::UShort => 2,
            BaseType::Integer | BaseType::UInteger | BaseType::Single => 4,
            _ => 8,
        }
    }

    /// Byte size of one element of an array type.
    pub fn element_size_bytes(&self) -> u64 {
        match &self.element {
            Some(elem) => elem.size_bytes(),
            None => self.size_bytes(),
        }
    }

    pub fn element_type(&self) -> Option<&TypeDescriptor> {
        self.element.as_deref()
    }
}

/// BASIC conversion function that narrows into the given integer type.
fn narrow_conversion_name(to: BaseType) -> &'static str {
    match to {
        BaseType::Byte | BaseType::UByte => "CBYTE",
        BaseType::Short | BaseType::UShort => "CSHORT",
        BaseType::Integer | BaseType::UInteger => "CINT",
        _ => "CLNG",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_mapping() {
        assert_eq!(
            TypeDescriptor::of_suffix('%').unwrap().base,
            BaseType::Integer
        );
        assert_eq!(TypeDescriptor::of_suffix('&').unwrap().base, BaseType::Long);
        assert_eq!(
            TypeDescriptor::of_suffix('!').unwrap().base,
            BaseType::Single
        );
        assert_eq!(
            TypeDescriptor::of_suffix('#').unwrap().base,
            BaseType::Double
        );
        assert_eq!(
            TypeDescriptor::of_suffix('$').unwrap().base,
            BaseType::String
        );
        assert_eq!(TypeDescriptor::of_suffix('@').unwrap().base, BaseType::Byte);
        assert_eq!(
            TypeDescriptor::of_suffix('^').unwrap().base,
            BaseType::Short
        );
        assert!(TypeDescriptor::of_suffix('?').is_none());
    }

    #[test]
    fn test_keyword_mapping_sets_unsigned() {
        let t = TypeDescriptor::of_keyword("ULONG").unwrap();
        assert_eq!(t.base, BaseType::ULong);
        assert!(t.attrs.is_unsigned);
        // same value-class bucket as the signed form
        assert_eq!(t.value_class(), TypeDescriptor::long().value_class());

        let t = TypeDescriptor::of_keyword("ubyte").unwrap();
        assert_eq!(t.base, BaseType::UByte);
        assert_eq!(t.value_class(), ValueClass::Word);
    }

    #[test]
    fn test_int_literal_narrowest_type() {
        assert_eq!(TypeDescriptor::infer_int_literal(0).base, BaseType::Byte);
        assert_eq!(TypeDescriptor::infer_int_literal(-128).base, BaseType::Byte);
        assert_eq!(TypeDescriptor::infer_int_literal(128).base, BaseType::Short);
        assert_eq!(
            TypeDescriptor::infer_int_literal(40_000).base,
            BaseType::Integer
        );
        assert_eq!(
            TypeDescriptor::infer_int_literal(3_000_000_000).base,
            BaseType::Long
        );
        assert_eq!(
            TypeDescriptor::infer_int_literal(-2_147_483_648).base,
            BaseType::Integer
        );
    }

    #[test]
    fn test_float_literal_inference() {
        assert_eq!(
            TypeDescriptor::infer_float_literal(3.25).base,
            BaseType::Single
        );
        assert_eq!(
            TypeDescriptor::infer_float_literal(1.0e300).base,
            BaseType::Double
        );
    }

    #[test]
    fn test_promotion_lattice() {
        let int = TypeDescriptor::integer();
        let long = TypeDescriptor::long();
        let single = TypeDescriptor::single();
        let double = TypeDescriptor::double();
        let uinteger = TypeDescriptor::scalar(BaseType::UInteger);
        let string = TypeDescriptor::string();
        let unicode = TypeDescriptor::scalar(BaseType::Unicode);

        // float beats integer
        assert_eq!(int.promote(&single).base, BaseType::Single);
        assert_eq!(long.promote(&single).base, BaseType::Single);
        assert_eq!(single.promote(&double).base, BaseType::Double);
        // higher integer rank beats lower
        assert_eq!(int.promote(&long).base, BaseType::Long);
        // equal rank with mixed signedness promotes to signed
        assert_eq!(int.promote(&uinteger).base, BaseType::Integer);
        // string contagion
        assert_eq!(string.promote(&int).base, BaseType::String);
        assert_eq!(string.promote(&unicode).base, BaseType::Unicode);
    }

    #[test]
    fn test_coercion_classes() {
        let byte = TypeDescriptor::scalar(BaseType::Byte);
        let int = TypeDescriptor::integer();
        let long = TypeDescriptor::long();
        let single = TypeDescriptor::single();
        let double = TypeDescriptor::double();
        let string = TypeDescriptor::string();

        assert_eq!(int.coerce_to(&int), Coercion::Identical);
        assert_eq!(byte.coerce_to(&long), Coercion::ImplicitSafe);
        assert_eq!(single.coerce_to(&double), Coercion::ImplicitSafe);
        assert_eq!(long.coerce_to(&int), Coercion::ImplicitLossy { via: "CINT" });
        assert_eq!(
            long.coerce_to(&single),
            Coercion::ImplicitLossy { via: "CSNG" }
        );
        assert_eq!(
            double.coerce_to(&single),
            Coercion::ImplicitLossy { via: "CSNG" }
        );
        assert_eq!(
            double.coerce_to(&int),
            Coercion::ExplicitRequired { via: "CINT" }
        );
        assert_eq!(
            string.coerce_to(&int),
            Coercion::ExplicitRequired { via: "VAL" }
        );
        assert_eq!(
            int.coerce_to(&string),
            Coercion::ExplicitRequired { via: "STR$" }
        );
    }

    #[test]
    fn test_udt_equality_is_nominal() {
        let a = TypeDescriptor::user_defined(1, "Point");
        let b = TypeDescriptor::user_defined(1, "PointAlias");
        let c = TypeDescriptor::user_defined(2, "Point");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.coerce_to(&c), Coercion::Incompatible);
    }

    #[test]
    fn test_array_equality_ignores_dims() {
        let a = TypeDescriptor::array_of(TypeDescriptor::integer(), vec![10]);
        let b = TypeDescriptor::array_of(TypeDescriptor::integer(), vec![20, 5]);
        let c = TypeDescriptor::array_of(TypeDescriptor::double(), vec![10]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            a.coerce_to(&TypeDescriptor::integer()),
            Coercion::Incompatible
        );
    }

    #[test]
    fn test_value_classes() {
        assert_eq!(
            TypeDescriptor::scalar(BaseType::Byte).value_class(),
            ValueClass::Word
        );
        assert_eq!(
            TypeDescriptor::scalar(BaseType::UShort).value_class(),
            ValueClass::Word
        );
        assert_eq!(TypeDescriptor::integer().value_class(), ValueClass::Word);
        assert_eq!(TypeDescriptor::long().value_class(), ValueClass::Long);
        assert_eq!(TypeDescriptor::loop_index().value_class(), ValueClass::Long);
        assert_eq!(TypeDescriptor::string().value_class(), ValueClass::Long);
        assert_eq!(TypeDescriptor::single().value_class(), ValueClass::Single);
        assert_eq!(TypeDescriptor::double().value_class(), ValueClass::Double);
    }

    #[test]
    fn test_mem_ops() {
        assert_eq!(
            TypeDescriptor::scalar(BaseType::Byte).mem_op(),
            MemOp::SignedByte
        );
        assert_eq!(
            TypeDescriptor::scalar(BaseType::UByte).mem_op(),
            MemOp::UnsignedByte
        );
        assert_eq!(
            TypeDescriptor::scalar(BaseType::Short).mem_op(),
            MemOp::SignedHalf
        );
        assert_eq!(
            TypeDescriptor::scalar(BaseType::UShort).mem_op(),
            MemOp::UnsignedHalf
        );
        assert_eq!(TypeDescriptor::integer().mem_op(), MemOp::Word);
        assert_eq!(TypeDescriptor::long().mem_op(), MemOp::Long);
        assert_eq!(TypeDescriptor::single().mem_op(), MemOp::Single);
        assert_eq!(TypeDescriptor::double().mem_op(), MemOp::Double);
        assert_eq!(MemOp::SignedByte.store_suffix(), "b");
        assert_eq!(MemOp::UnsignedHalf.store_suffix(), "h");
    }

    #[test]
    fn test_sizes() {
        assert_eq!(TypeDescriptor::scalar(BaseType::Byte).size_bytes(), 1);
        assert_eq!(TypeDescriptor::scalar(BaseType::Short).size_bytes(), 2);
        assert_eq!(TypeDescriptor::integer().size_bytes(), 4);
        assert_eq!(TypeDescriptor::single().size_bytes(), 4);
        assert_eq!(TypeDescriptor::long().size_bytes(), 8);
        assert_eq!(TypeDescriptor::double().size_bytes(), 8);
        assert_eq!(TypeDescriptor::string().size_bytes(), 8);
        let arr = TypeDescriptor::array_of(TypeDescriptor::scalar(BaseType::Short), vec![4]);
        assert_eq!(arr.element_size_bytes(), 2);
    }
}
