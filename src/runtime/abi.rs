//! Fixed contract between emitted code and the C runtime: record layouts,
//! byte tags, and the callable entry points. The emitter never spells a
//! runtime symbol or field offset inline; everything goes through here.

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use strum_macros::Display;

/// String descriptor field offsets. 40 bytes total:
/// data pointer, i64 length (characters), i64 capacity (characters),
/// i32 refcount, u8 encoding, u8 utf8-cache dirty flag, 2 bytes padding,
/// utf8 cache pointer.
pub mod string_desc {
    pub const DATA: u64 = 0;
    pub const LENGTH: u64 = 8;
    pub const CAPACITY: u64 = 16;
    pub const REFCOUNT: u64 = 24;
    pub const ENCODING: u64 = 28;
    pub const DIRTY: u64 = 29;
    pub const UTF8_CACHE: u64 = 32;
    pub const SIZE: u64 = 40;
}

/// Array descriptor field offsets (single-dimension form). Multi-dim
/// arrays append one `{lower, upper, stride}` record per dimension after
/// the fixed part; strides are in elements, last dimension 1.
pub mod array_desc {
    pub const DATA: u64 = 0;
    pub const LOWER: u64 = 8;
    pub const UPPER: u64 = 16;
    pub const ELEM_SIZE: u64 = 24;
    pub const RANK: u64 = 32;
    pub const RESERVED: u64 = 36;
    pub const TYPE_TAG: u64 = 40;
    pub const DIMS: u64 = 48;
    pub const DIM_SIZE: u64 = 24;
    pub const DIM_LOWER: u64 = 0;
    pub const DIM_UPPER: u64 = 8;
    pub const DIM_STRIDE: u64 = 16;
}

/// Bytes per global slot; slot `i` lives at byte offset `i * 8`.
pub const GLOBAL_SLOT_SIZE: u64 = 8;

/// Fixed depth of the runtime GOSUB return stack. Overflow is fatal at
/// runtime; underflow degrades to program exit.
pub const GOSUB_STACK_DEPTH: u32 = 16;

/// Encoding byte at `string_desc::ENCODING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Display)]
#[repr(u8)]
pub enum StringEncoding {
    /// one byte per character
    Ascii = 0,
    /// four bytes per character
    Utf32 = 1,
}

/// Tag byte in the DATA table's parallel tag array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Display)]
#[repr(u8)]
pub enum DataTag {
    Int = 0,
    DoubleBits = 1,
    StringPtr = 2,
}

/// Runtime lifecycle and error reporting.
pub mod rt {
    pub const INIT: &str = "basic_runtime_init";
    pub const CLEANUP: &str = "basic_runtime_cleanup";
    /// prints `Runtime error at line N: msg` and exits
    pub const ERROR: &str = "basic_runtime_error";
    pub const ARENA_ALLOC: &str = "basic_arena_alloc";
}

/// Globals slot vector.
pub mod globals {
    pub const INIT: &str = "basic_global_init";
    pub const BASE: &str = "basic_global_base";
    pub const CLEANUP: &str = "basic_global_cleanup";
}

/// DATA table registration and cursor operations.
pub mod data {
    pub const REGISTER: &str = "basic_data_register";
    pub const READ_INT: &str = "basic_data_read_int";
    pub const READ_DOUBLE: &str = "basic_data_read_double";
    pub const READ_STRING: &str = "basic_data_read_string";
    pub const RESTORE: &str = "basic_data_restore";
    pub const RESTORE_START: &str = "basic_data_restore_start";
}

/// Pending-error slot used by THROW/CATCH. Runtime-raised errors that a
/// TRY block can observe land in the same slot.
pub mod error {
    pub const SET: &str = "basic_error_set";
    pub const GET: &str = "basic_error_get";
}

/// GOSUB return stack.
pub mod gosub {
    pub const PUSH: &str = "basic_gosub_push";
    pub const POP: &str = "basic_gosub_pop";
}

/// Console I/O.
pub mod io {
    pub const PRINT_INT: &str = "basic_print_int";
    pub const PRINT_LONG: &str = "basic_print_long";
    pub const PRINT_FLOAT: &str = "basic_print_float";
    pub const PRINT_DOUBLE: &str = "basic_print_double";
    pub const PRINT_STRING: &str = "basic_print_string";
    pub const PRINT_CSTR: &str = "basic_print_cstr";
    pub const PRINT_NEWLINE: &str = "basic_print_newline";
    pub const PRINT_TAB: &str = "basic_print_tab";
    pub const PRINT_AT: &str = "basic_print_at";
    pub const CLS: &str = "basic_cls";
    pub const INPUT_STRING: &str = "basic_input_string";
    pub const INPUT_PROMPT: &str = "basic_input_prompt";
    pub const INPUT_INT: &str = "basic_input_int";
    pub const INPUT_DOUBLE: &str = "basic_input_double";
}

/// File I/O.
pub mod file {
    pub const OPEN: &str = "basic_file_open";
    pub const CLOSE: &str = "basic_file_close";
    pub const PRINT: &str = "basic_file_print";
    pub const PRINT_INT: &str = "basic_file_print_int";
    pub const PRINT_NEWLINE: &str = "basic_file_print_newline";
    pub const READ_LINE: &str = "basic_file_read_line";
    pub const EOF: &str = "basic_file_eof";
}

/// String descriptor operations. Every string value in emitted code is a
/// pointer to a refcounted descriptor; assignments transfer references.
pub mod string {
    pub const NEW_ASCII: &str = "basic_string_new_ascii";
    pub const NEW_UTF8: &str = "basic_string_new_utf8";
    pub const NEW_UTF32: &str = "basic_string_new_utf32";
    pub const NEW_CAPACITY: &str = "basic_string_new_capacity";
    pub const NEW_REPEAT: &str = "basic_string_new_repeat";
    pub const PROMOTE_UTF32: &str = "basic_string_promote_utf32";
    pub const CLONE: &str = "basic_string_clone";
    pub const RETAIN: &str = "basic_string_retain";
    pub const RELEASE: &str = "basic_string_release";
    pub const TO_UTF8: &str = "basic_string_to_utf8";
    pub const CONCAT: &str = "basic_string_concat";
    pub const MID: &str = "basic_string_mid";
    pub const LEFT: &str = "basic_string_left";
    pub const RIGHT: &str = "basic_string_right";
    pub const SLICE: &str = "basic_string_slice";
    pub const INSTR: &str = "basic_string_instr";
    pub const COMPARE: &str = "basic_string_compare";
    pub const COMPARE_NOCASE: &str = "basic_string_compare_nocase";
    pub const UPPER: &str = "basic_string_upper";
    pub const LOWER: &str = "basic_string_lower";
    pub const TRIM: &str = "basic_string_trim";
    pub const LTRIM: &str = "basic_string_ltrim";
    pub const RTRIM: &str = "basic_string_rtrim";
    pub const REVERSE: &str = "basic_string_reverse";
    pub const REPLACE: &str = "basic_string_replace";
    pub const TO_INT: &str = "basic_string_to_int";
    pub const TO_DOUBLE: &str = "basic_string_to_double";
    pub const FROM_INT: &str = "basic_string_from_int";
    pub const FROM_DOUBLE: &str = "basic_string_from_double";
    pub const CHR: &str = "basic_string_chr";
    pub const GET_CHAR_AT: &str = "basic_string_get_char_at";
    pub const SET_CHAR_AT: &str = "basic_string_set_char_at";
    pub const MID_ASSIGN: &str = "basic_string_mid_assign";
    pub const SLICE_ASSIGN: &str = "basic_string_slice_assign";
}

/// Array descriptor operations.
pub mod array {
    pub const NEW: &str = "basic_array_new";
    pub const NEW_MULTI: &str = "basic_array_new_multi";
    pub const FREE: &str = "basic_array_free";
    pub const LBOUND: &str = "basic_array_lbound";
    pub const UBOUND: &str = "basic_array_ubound";
    pub const REDIM: &str = "basic_array_redim";
    pub const BOUNDS_CHECK: &str = "basic_array_bounds_check";
    pub const ERASE: &str = "basic_array_erase";
    pub const DESTROY: &str = "basic_array_destroy";
}

/// Double-precision math shims. BASIC-level intrinsics that are not
/// lowered inline (ABS/SGN on doubles are) call these.
pub mod math {
    pub const SIN: &str = "basic_sin";
    pub const COS: &str = "basic_cos";
    pub const TAN: &str = "basic_tan";
    pub const ASIN: &str = "basic_asin";
    pub const ACOS: &str = "basic_acos";
    pub const ATN: &str = "basic_atn";
    pub const ATAN2: &str = "basic_atan2";
    pub const SINH: &str = "basic_sinh";
    pub const COSH: &str = "basic_cosh";
    pub const TANH: &str = "basic_tanh";
    pub const LOG: &str = "basic_log";
    pub const LOG2: &str = "basic_log2";
    pub const LOG10: &str = "basic_log10";
    pub const EXP: &str = "basic_exp";
    pub const SQR: &str = "basic_sqr";
    pub const POW: &str = "basic_pow";
    pub const FLOOR: &str = "basic_floor";
    pub const CEIL: &str = "basic_ceil";
    pub const ROUND: &str = "basic_round";
    pub const FIX: &str = "basic_fix";
    pub const FMOD: &str = "basic_fmod";
    pub const GAMMA: &str = "basic_gamma";
    pub const FACT: &str = "basic_fact";
    pub const COMB: &str = "basic_comb";
    pub const PERM: &str = "basic_perm";
    pub const NORMAL_PDF: &str = "basic_normal_pdf";
    pub const NORMAL_CDF: &str = "basic_normal_cdf";
    pub const CLAMP: &str = "basic_clamp";
    pub const PMT: &str = "basic_pmt";
    pub const PV: &str = "basic_pv";
    pub const FV: &str = "basic_fv";
    pub const RND: &str = "basic_rnd";
    pub const RANDOMIZE: &str = "basic_randomize";
    pub const TIMER: &str = "basic_timer";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        assert_eq!(u8::from(DataTag::Int), 0);
        assert_eq!(u8::from(DataTag::DoubleBits), 1);
        assert_eq!(u8::from(DataTag::StringPtr), 2);
        assert_eq!(DataTag::try_from(2u8).unwrap(), DataTag::StringPtr);
        assert!(DataTag::try_from(3u8).is_err());

        assert_eq!(u8::from(StringEncoding::Ascii), 0);
        assert_eq!(StringEncoding::try_from(1u8).unwrap(), StringEncoding::Utf32);
    }

    #[test]
    fn test_string_descriptor_layout() {
        assert_eq!(string_desc::DATA, 0);
        assert_eq!(string_desc::LENGTH, 8);
        assert_eq!(string_desc::CAPACITY, 16);
        assert_eq!(string_desc::REFCOUNT, 24);
        assert_eq!(string_desc::ENCODING, 28);
        assert_eq!(string_desc::DIRTY, 29);
        assert_eq!(string_desc::UTF8_CACHE, 32);
        assert_eq!(string_desc::SIZE, 40);
    }
}
