#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::instruction::{opr, sio, Instruction, Opcode};
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn compile(src: &str) -> Vec<Instruction> {
        let tokens = tokenize(src).expect("lex failed");
        Parser::new(&tokens).parse().expect("parse failed").code
    }

    fn compile_err(src: &str) -> ErrorKind {
        let tokens = tokenize(src).expect("lex failed");
        Parser::new(&tokens).parse().expect_err("expected a parse error").kind
    }

    #[test]
    fn empty_program_has_inc_and_ret() {
        let code = compile("START END");
        assert_eq!(code.first().unwrap().op, Opcode::Inc);
        assert_eq!(code.last().unwrap().op, Opcode::Opr);
        assert_eq!(code.last().unwrap().m, opr::RET);
    }

    #[test]
    fn missing_start_is_rejected() {
        assert_eq!(compile_err("END"), ErrorKind::MissingStart);
    }

    #[test]
    fn missing_end_is_rejected() {
        assert_eq!(compile_err("START"), ErrorKind::ProgramIncomplete);
    }

    #[test]
    fn variable_declaration_reserves_a_frame_slot() {
        let code = compile("START int x; x := 5; END");
        assert!(code.iter().any(|i| i.op == Opcode::Sto && i.m == 4));
    }

    #[test]
    fn duplicate_variable_is_rejected() {
        assert_eq!(compile_err("START int x; int x; END"), ErrorKind::DuplicateSymbol);
    }

    #[test]
    fn undefined_variable_is_rejected() {
        assert_eq!(compile_err("START x := 1; END"), ErrorKind::UndefinedSymbol);
    }

    #[test]
    fn const_is_loaded_as_a_literal() {
        let code = compile("START const int answer = 42; write(answer); END");
        assert!(code.iter().any(|i| i.op == Opcode::Lit && i.m == 42));
    }

    #[test]
    fn array_literal_initializer_stores_each_element() {
        let code = compile("START int a[3] = {1, 2, 3}; END");
        let stores: Vec<_> = code.iter().filter(|i| i.op == Opcode::Sto).collect();
        assert_eq!(stores.len(), 3);
        assert_eq!(stores[0].m, 4);
        assert_eq!(stores[2].m, 6);
    }

    #[test]
    fn array_size_must_be_positive() {
        assert_eq!(compile_err("START int a[0]; END"), ErrorKind::InvalidArraySize);
    }

    #[test]
    fn if_without_else_patches_jpc_to_fallthrough() {
        let code = compile("START int x; if (x == 1) { x := 2; } END");
        let jpc = code.iter().find(|i| i.op == Opcode::Jpc).unwrap();
        assert_eq!(jpc.m, code.len() as i32 - 1);
    }

    #[test]
    fn if_else_emits_exactly_one_jpc_and_one_jmp() {
        let code = compile("START int x; if (x == 1) { x := 2; } else { x := 3; } END");
        assert_eq!(code.iter().filter(|i| i.op == Opcode::Jpc).count(), 1);
        assert_eq!(code.iter().filter(|i| i.op == Opcode::Jmp).count(), 1);
    }

    #[test]
    fn while_loop_jumps_back_before_the_exit_target() {
        let code = compile("START int x; while (x != 0) { x := x - 1; } END");
        let jmp = code.iter().find(|i| i.op == Opcode::Jmp).unwrap();
        let jpc = code.iter().find(|i| i.op == Opcode::Jpc).unwrap();
        assert!(jmp.m < jpc.m);
    }

    #[test]
    fn do_while_negates_the_condition_before_branching_back() {
        let code = compile("START int x; do { x := x + 1; } while (x < 10); END");
        let jpc_pos = code.iter().position(|i| i.op == Opcode::Jpc).unwrap();
        assert_eq!(code[jpc_pos - 1].op, Opcode::Opr);
        assert_eq!(code[jpc_pos - 1].m, opr::EQ);
        assert_eq!(code[jpc_pos - 2].op, Opcode::Lit);
        assert_eq!(code[jpc_pos - 2].m, 0);
    }

    #[test]
    fn repeat_until_branches_back_on_the_raw_condition() {
        let code = compile("START int x; repeat { x := x + 1; } until (x >= 10); END");
        let jpc_pos = code.iter().position(|i| i.op == Opcode::Jpc).unwrap();
        assert_eq!(code[jpc_pos - 1].op, Opcode::Opr);
        assert_eq!(code[jpc_pos - 1].m, opr::GRT_EQ);
    }

    #[test]
    fn for_loop_body_runs_before_the_step_clause() {
        let code = compile("START int i; for (i := 0; i < 3; i := i + 1) { write(i); } END");
        let jpc = code.iter().find(|i| i.op == Opcode::Jpc).unwrap();
        let sio_write = code.iter().position(|i| i.op == Opcode::Sio && i.m == sio::WRITE).unwrap();
        assert!(jpc.m as usize > sio_write);
    }

    #[test]
    fn foreach_allocates_a_raw_temp_slot_for_the_index() {
        let code = compile("START int a[3] = {1, 2, 3}; int x; foreach (x : a) { write(x); } END");
        assert!(code.iter().any(|i| i.op == Opcode::Inc && i.m == 1));
        assert!(code.iter().any(|i| i.op == Opcode::Inc && i.m == -1));
    }

    #[test]
    fn foreach_type_mismatch_is_rejected() {
        assert_eq!(
            compile_err("START bool[] flags = {true}; int x; foreach (x : flags) { write(x); } END"),
            ErrorKind::TypeMismatch
        );
    }

    #[test]
    fn switch_case_break_skips_over_its_own_jump_on_fallthrough() {
        let code = compile("START int x; switch (x) { case 1: write(1); break; case 2: write(2); } END");
        assert_eq!(code.iter().filter(|i| i.op == Opcode::Jpc).count(), 2);
    }

    #[test]
    fn goto_forward_reference_is_backpatched() {
        let code = compile("START goto skip; write(1); skip: write(2); END");
        let jmp = code.iter().find(|i| i.op == Opcode::Jmp).unwrap();
        assert!(jmp.m > 0);
    }

    #[test]
    fn undefined_goto_label_is_rejected_at_end_of_program() {
        assert_eq!(compile_err("START goto nowhere; END"), ErrorKind::UndefinedLabel);
    }

    #[test]
    fn goto_to_a_non_label_symbol_is_rejected() {
        assert_eq!(compile_err("START int x; goto x; END"), ErrorKind::NotALabel);
    }

    #[test]
    fn chained_assignment_shares_one_rhs_evaluation() {
        let code = compile("START int a; int b; a := b := 5; END");
        assert_eq!(code.iter().filter(|i| i.op == Opcode::Lit && i.m == 5).count(), 1);
        assert_eq!(code.iter().filter(|i| i.op == Opcode::Sto).count(), 2);
    }

    #[test]
    fn ternary_uses_the_if_else_jump_shape() {
        let code = compile("START int a; a := # a == 0 ? 1 : 2; END");
        assert_eq!(code.iter().filter(|i| i.op == Opcode::Jpc).count(), 1);
        assert_eq!(code.iter().filter(|i| i.op == Opcode::Jmp).count(), 1);
    }

    #[test]
    fn instanceof_emits_a_boolean_literal() {
        let code = compile("START int a; bool b; b := a instanceof int; END");
        assert!(code.iter().any(|i| i.op == Opcode::Lit && i.m == 1));
    }

    #[test]
    fn read_into_bool_normalizes_nonzero_input() {
        let code = compile("START bool flag; read(flag); END");
        let sio_pos = code.iter().position(|i| i.op == Opcode::Sio && i.m == sio::READ).unwrap();
        assert_eq!(code[sio_pos + 1].op, Opcode::Lit);
        assert_eq!(code[sio_pos + 2].op, Opcode::Opr);
        assert_eq!(code[sio_pos + 2].m, opr::NEQ);
    }

    #[test]
    fn write_array_element_loads_through_lda() {
        let code = compile("START int a[3] = {1, 2, 3}; write(a[1]); END");
        assert!(code.iter().any(|i| i.op == Opcode::Lda));
    }

    #[test]
    fn function_call_uses_the_static_link_delta() {
        let code = compile("START function noop() { } call noop(); END");
        let cal = code.iter().find(|i| i.op == Opcode::Cal).unwrap();
        assert_eq!(cal.l, 0);
    }

    #[test]
    fn calling_a_non_function_is_rejected() {
        assert_eq!(compile_err("START int x; call x(); END"), ErrorKind::NotAFunction);
    }
}
