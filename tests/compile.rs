//! Source-to-IL tests over complete programs. The backend and the C
//! runtime are not exercised here; these assert on the structure of the
//! emitted text (labels, opcodes, runtime calls).

use indoc::indoc;

use fasterbasic::compiler::CompileOptions;
use fasterbasic::compiler::CompileOutput;
use fasterbasic::compiler::compile_source;

fn compile(src: &str) -> CompileOutput {
    compile_source(src, &CompileOptions::default()).expect("compilation failed")
}

fn il(src: &str) -> String {
    compile(src).il
}

#[test]
fn test_signed_division_function() {
    let out = il(indoc! {"
        FUNCTION TestDiv&(d AS LONG, v AS LONG) AS LONG
            RETURN d \\ v
        END FUNCTION
        PRINT TestDiv&(-15, 4)
        END
    "});
    assert!(out.contains("export function l $TESTDIV_l(l %p0, l %p1)"));
    // a non-constant divisor uses the (truncating) division instruction
    assert!(out.contains("=l div "));
    assert!(out.contains("call $basic_print_long"));
}

#[test]
fn test_power_of_two_division_rounds_toward_zero() {
    let out = il("x& = -15\nPRINT x& \\ 4\nEND\n");
    // sign mask, adjustment by divisor-1, then the arithmetic shift
    assert!(out.contains("sar"), "missing arithmetic shift:\n{out}");
    assert!(out.contains(", 63"), "missing 64-bit sign extraction:\n{out}");
    assert!(out.contains("and"), "missing sign mask:\n{out}");
    assert!(out.contains(", 3"), "missing divisor-1 mask:\n{out}");
    assert!(out.contains(", 2"), "missing shift amount:\n{out}");
    // the plain div path must not be taken
    assert!(!out.contains("=l div "), "power of two fell back to div:\n{out}");
}

#[test]
fn test_on_gosub_push_and_dispatch() {
    let out = il(indoc! {"
        FOR I = 1 TO 3
            ON I GOSUB 100, 200, 300
            PRINT \"back\"; I
        NEXT I
        END
        100 PRINT \"Sub 1\"
        RETURN
        200 PRINT \"Sub 2\"
        RETURN
        300 PRINT \"Sub 3\"
        RETURN
    "});
    // each arm of the dispatch pushes the shared return point
    assert!(out.contains("call $basic_gosub_push(w "));
    // RETURN pops and re-dispatches over the recorded return points
    assert!(out.contains("call $basic_gosub_pop()"));
    assert!(out.contains("@target_100"));
    assert!(out.contains("@target_200"));
    assert!(out.contains("@target_300"));
}

#[test]
fn test_gosub_inside_if_returns_to_gosub_point() {
    let out = il(indoc! {"
        x = 20
        IF x MOD 10 = 0 THEN
            GOSUB 500
            PRINT \"After GOSUB - result=42\"
        END IF
        END
        500 PRINT \"sub\"
        RETURN
    "});
    // the GOSUB pushes its own return point (not the block after END IF)
    assert!(out.contains("call $basic_gosub_push(w "));
    assert!(out.contains("@return_point"));
    assert!(out.contains("After GOSUB - result=42"));
}

#[test]
fn test_iif_is_lazy() {
    let out = il(indoc! {"
        LET x = 10
        PRINT IIF(x > 5, x * 2, x / 0)
        END
    "});
    // both arms exist but sit behind a branch; only one executes
    assert!(out.contains("@iif_true"));
    assert!(out.contains("@iif_false"));
    assert!(out.contains("@iif_end"));
    let jnz_count = out.lines().filter(|l| l.contains("jnz")).count();
    assert!(jnz_count >= 1);
}

#[test]
fn test_select_case_value_lists_and_ranges() {
    let out = il(indoc! {"
        LET i = 7
        SELECT CASE i
            CASE 2, 4, 6, 8 : PRINT \"Even\"
            CASE 1, 3, 5, 7, 9 : PRINT \"Odd\"
        END SELECT
        END
    "});
    assert!(out.contains("@case_check"));
    assert!(out.contains("@case_body"));
    assert!(out.contains("@select_exit"));
    assert!(out.contains("Even"));
    assert!(out.contains("Odd"));
    // the value lists lower to equality chains
    let eq_count = out.lines().filter(|l| l.contains("ceq")).count();
    assert!(eq_count >= 9, "expected one test per CASE value:\n{out}");
}

#[test]
fn test_string_indexed_write_goes_through_runtime() {
    let out = il(indoc! {"
        s$ = \"A\"
        s$(0) = 233
        PRINT LEN(s$)
        PRINT ASC(s$)
        END
    "});
    // writes promote in place via the runtime
    assert!(out.contains("call $basic_string_set_char_at(l "));
    // LEN reads the length field straight from the descriptor
    assert!(out.contains("=l add") && out.contains("loadl"));
    // ASC selects the load width from the encoding byte
    assert!(out.contains("loadub"));
    assert!(out.contains("@asc_wide") && out.contains("@asc_narrow"));
}

#[test]
fn test_memory_ops_follow_signedness() {
    let out = il(indoc! {"
        DIM b AS BYTE
        DIM ub AS UBYTE
        DIM h AS SHORT
        DIM uh AS USHORT
        b = 1
        ub = 2
        h = 3
        uh = 4
        PRINT b + ub + h + uh
        END
    "});
    assert!(out.contains("loadsb"), "BYTE load must sign-extend:\n{out}");
    assert!(out.contains("loadub"), "UBYTE load must zero-extend:\n{out}");
    assert!(out.contains("loadsh"), "SHORT load must sign-extend:\n{out}");
    assert!(out.contains("loaduh"), "USHORT load must zero-extend:\n{out}");
    assert!(out.contains("storeb"));
    assert!(out.contains("storeh"));
}

#[test]
fn test_string_assignment_refcounts() {
    let out = il(indoc! {"
        a$ = \"x\"
        b$ = a$
        PRINT a$ + b$
        END
    "});
    // the old value is released before every store
    assert!(out.contains("call $basic_string_release(l "));
    // copying from a variable retains; the concat temp is released after
    // the PRINT completes
    assert!(out.contains("call $basic_string_retain(l "));
    assert!(out.contains("call $basic_string_concat(l "));
}

#[test]
fn test_globals_use_slot_offsets() {
    let out = il(indoc! {"
        GLOBAL a AS INTEGER, b AS DOUBLE
        a = 1
        b = 2.5
        PRINT a
        END
    "});
    assert!(out.contains("call $basic_global_init(w 2)"));
    assert!(out.contains("=l call $basic_global_base()"));
    // slot 1 lives at byte offset 8
    assert!(out.contains("add %gb, 8"));
    assert!(out.contains("call $basic_global_cleanup()"));
}

#[test]
fn test_data_read_restore() {
    let out = il(indoc! {"
        100 DATA 1, 2.5, \"three\"
        READ a, d#, s$
        RESTORE
        READ b
        END
    "});
    assert!(out.contains("data $data_values = { l 1, l "));
    assert!(out.contains("data $data_tags = { b 0, b 1, b 2 }"));
    assert!(out.contains("call $basic_data_register(l $data_values, l $data_tags, w 3)"));
    assert!(out.contains("call $basic_data_read_int()"));
    assert!(out.contains("call $basic_data_read_double()"));
    assert!(out.contains("call $basic_data_read_string()"));
    assert!(out.contains("call $basic_data_restore_start()"));
}

#[test]
fn test_udt_member_access_uses_offsets() {
    let out = il(indoc! {"
        TYPE Point
            x AS DOUBLE
            y AS DOUBLE
        END TYPE
        DIM p AS Point
        p.x = 1.5
        p.y = p.x + 1
        PRINT p.y
        END
    "});
    assert!(out.contains("type :POINT = align 8 { 16 }"));
    // y sits at offset 8
    assert!(out.contains("add %v.P, 8"));
    assert!(out.contains("stored"));
}

#[test]
fn test_array_access_bounds_checked() {
    let out = il(indoc! {"
        DIM a(10) AS INTEGER
        a(3) = 7
        PRINT a(3)
        END
    "});
    assert!(out.contains("call $basic_array_new(l 4, l 0, l 10, w "));
    assert!(out.contains("call $basic_array_bounds_check(l "));
    assert!(out.contains("storew"));
}

#[test]
fn test_abs_and_sgn_lowering() {
    let out = il(indoc! {"
        d# = -3.5
        PRINT ABS(d#)
        PRINT SGN(d#)
        END
    "});
    // ABS(double): bitcast, mask the sign bit, bitcast back
    assert!(out.contains("=l cast"));
    assert!(out.contains("and") && out.contains("9223372036854775807"));
    assert!(out.contains("=d cast"));
    // SGN(double): (x > 0) - (x < 0), no branches
    assert!(out.contains("cgtd"));
    assert!(out.contains("cltd"));
}

#[test]
fn test_while_and_do_loops() {
    let out = il(indoc! {"
        x = 0
        WHILE x < 3
            x = x + 1
        WEND
        DO
            x = x - 1
        LOOP UNTIL x = 0
        END
    "});
    assert!(out.contains("@while_header"));
    assert!(out.contains("@while_body"));
    assert!(out.contains("@loop_body"));
    assert!(out.contains("@loop_cond"));
}

#[test]
fn test_try_catch_finally() {
    let out = il(indoc! {"
        TRY
            THROW 42
        CATCH e
            PRINT e
        FINALLY
            PRINT \"done\"
        END TRY
        END
    "});
    assert!(out.contains("call $basic_error_set(w 42)"));
    assert!(out.contains("call $basic_error_get()"));
    assert!(out.contains("@catch"));
    assert!(out.contains("@finally"));
}

#[test]
fn test_lossy_coercion_warns_but_compiles() {
    let out = compile(indoc! {"
        x& = 100000
        n% = x&
        END
    "});
    assert!(
        out.diagnostics
            .warnings()
            .any(|d| d.message.contains("lossy"))
    );
}

#[test]
fn test_string_to_int_assignment_is_an_error() {
    let result = compile_source("n% = \"oops\"\nEND\n", &CompileOptions::default());
    assert!(result.is_err());
}

#[test]
fn test_def_fn_emitted_as_function() {
    let out = il(indoc! {"
        DEF FNSQ(x AS DOUBLE) = x * x
        PRINT FNSQ(3.0)
        END
    "});
    assert!(out.contains("function"));
    assert!(out.contains("$FNSQ"));
    assert!(out.contains("call $FNSQ"));
}

#[test]
fn test_for_in_iterates_array() {
    let out = il(indoc! {"
        DIM a(4) AS LONG
        FOR v IN a
            PRINT v
        NEXT
        END
    "});
    assert!(out.contains("call $basic_array_lbound"));
    assert!(out.contains("call $basic_array_ubound"));
    assert!(out.contains("@forin_header"));
}

#[test]
fn test_exit_and_continue() {
    let out = il(indoc! {"
        FOR i = 1 TO 10
            IF i = 3 THEN
                CONTINUE
            END IF
            IF i = 5 THEN
                EXIT FOR
            END IF
            PRINT i
        NEXT i
        END
    "});
    assert!(out.contains("@for_increment"));
    assert!(out.contains("@for_exit"));
}

#[test]
fn test_unsigned_division_and_shift() {
    let out = il(indoc! {"
        DIM u AS UINTEGER
        u = 100
        PRINT u / 7
        PRINT u SHR 2
        END
    "});
    assert!(out.contains("udiv"), "unsigned / must use udiv:\n{out}");
    assert!(out.contains("shr"), "unsigned SHR must use shr:\n{out}");
}
