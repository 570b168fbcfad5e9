//! Stack-machine interpreter.
//!
//! Executes the flat instruction vector the parser produced against a
//! fixed-size integer stack, using static-link activation records for
//! non-local variable access across nested lexical scopes.

use std::io::{self, BufRead, Write};

use crate::error::RuntimeError;
use crate::instruction::{opr, sio, Instruction, Opcode};

/// Slot 0 of the stack is reserved/unused; valid data occupies 1..=STACK_SIZE.
pub const STACK_SIZE: usize = 1024;

pub struct Vm<'a> {
    code: &'a [Instruction],
    stack: Vec<i32>,
    sp: usize,
    bp: usize,
    pc: usize,
    running: bool,
    trace: Option<Box<dyn Write + 'a>>,
    output: Box<dyn Write + 'a>,
    input: Box<dyn BufRead + 'a>,
}

impl<'a> Vm<'a> {
    pub fn new(code: &'a [Instruction]) -> Self {
        Vm {
            code,
            stack: vec![0; STACK_SIZE + 1],
            sp: 0,
            bp: 1,
            pc: 0,
            running: true,
            trace: None,
            output: Box::new(io::stdout()),
            input: Box::new(io::BufReader::new(io::stdin())),
        }
    }

    /// Attaches a sink that receives one line per executed instruction, in
    /// the `PC OP l m | PC BP SP | stack` format of the debug trace.
    pub fn with_trace(mut self, writer: Box<dyn Write + 'a>) -> Self {
        self.trace = Some(writer);
        self
    }

    /// Redirects `write`'s output away from stdout — used by tests that
    /// need to observe a program's output without capturing the process.
    pub fn with_output(mut self, writer: Box<dyn Write + 'a>) -> Self {
        self.output = writer;
        self
    }

    /// Redirects `read`'s input away from stdin.
    pub fn with_input(mut self, reader: Box<dyn BufRead + 'a>) -> Self {
        self.input = reader;
        self
    }

    pub fn execute(&mut self) -> Result<(), RuntimeError> {
        while self.running && self.bp != 0 {
            let addr = self.pc;
            let instr = *self
                .code
                .get(self.pc)
                .ok_or_else(|| RuntimeError::new(format!("program counter {} out of range", self.pc)))?;
            self.pc += 1;
            self.step(instr)?;
            self.trace_line(addr, &instr);
        }
        Ok(())
    }

    fn trace_line(&mut self, addr: usize, instr: &Instruction) {
        if let Some(writer) = self.trace.as_mut() {
            let top = self.sp.saturating_sub(9).max(1);
            let stack_slice: Vec<String> = (top..=self.sp).map(|i| self.stack.get(i).copied().unwrap_or(0).to_string()).collect();
            let _ = writeln!(
                writer,
                "[#{:03}] {} {} {} | {} {} {} | {}",
                addr,
                instr.op.mnemonic(),
                instr.l,
                instr.m,
                self.pc,
                self.bp,
                self.sp,
                stack_slice.join(" "),
            );
        }
    }

    fn base(&self, l: i32, b: usize) -> Result<usize, RuntimeError> {
        let mut base = b;
        for _ in 0..l {
            base = self.checked_index(base + 1)? as usize;
        }
        Ok(base)
    }

    fn checked_index(&self, addr: usize) -> Result<i32, RuntimeError> {
        self.stack.get(addr).copied().ok_or_else(|| RuntimeError::new(format!("address {} out of range", addr)))
    }

    fn push(&mut self, value: i32) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::new("stack overflow"));
        }
        self.sp += 1;
        self.stack[self.sp] = value;
        Ok(())
    }

    fn pop(&mut self) -> Result<i32, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::new("stack underflow"));
        }
        let value = self.stack[self.sp];
        self.sp -= 1;
        Ok(value)
    }

    fn step(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        match instr.op {
            Opcode::Lit => self.push(instr.m)?,
            Opcode::Opr => self.exec_opr(instr.m)?,
            Opcode::Lod => {
                let addr = self.base(instr.l, self.bp)? + instr.m as usize;
                let value = self.checked_index(addr)?;
                self.push(value)?;
            }
            Opcode::Sto => {
                let addr = self.base(instr.l, self.bp)? + instr.m as usize;
                let value = self.pop()?;
                if addr >= self.stack.len() {
                    return Err(RuntimeError::new(format!("address {} out of range", addr)));
                }
                self.stack[addr] = value;
            }
            Opcode::Cal => {
                if self.sp + 4 >= self.stack.len() {
                    return Err(RuntimeError::new("stack overflow"));
                }
                let static_link = self.base(instr.l, self.bp)?;
                self.stack[self.sp + 1] = 0;
                self.stack[self.sp + 2] = static_link as i32;
                self.stack[self.sp + 3] = self.bp as i32;
                self.stack[self.sp + 4] = self.pc as i32;
                self.bp = self.sp + 1;
                self.pc = instr.m as usize;
            }
            Opcode::Inc => self.adjust_sp(instr.m)?,
            Opcode::Dec => self.adjust_sp(-instr.m)?,
            Opcode::Jmp => self.pc = instr.m as usize,
            Opcode::Jpc => {
                if self.sp == 0 {
                    return Err(RuntimeError::new("stack underflow"));
                }
                if self.stack[self.sp] == 0 {
                    self.pc = instr.m as usize;
                }
                self.sp -= 1;
            }
            Opcode::Sio => match instr.m {
                sio::WRITE => {
                    let value = self.pop()?;
                    writeln!(self.output, "{}", value).map_err(|e| RuntimeError::new(format!("write failed: {}", e)))?;
                }
                sio::READ => {
                    let value = self.read_integer()?;
                    self.push(value)?;
                }
                sio::HALT => self.running = false,
                other => return Err(RuntimeError::new(format!("unknown SIO selector {}", other))),
            },
            Opcode::Lda => {
                if self.sp == 0 {
                    return Err(RuntimeError::new("stack underflow"));
                }
                let index = self.stack[self.sp];
                let addr = self.base(instr.l, self.bp)? as i64 + index as i64;
                let value = self.checked_index_i64(addr)?;
                self.stack[self.sp] = value;
            }
            Opcode::Sta => {
                if self.sp < 2 {
                    return Err(RuntimeError::new("stack underflow: STA needs two operands"));
                }
                let index = self.stack[self.sp - 1];
                let value = self.stack[self.sp];
                let addr = self.base(instr.l, self.bp)? as i64 + index as i64;
                self.write_checked_i64(addr, value)?;
                self.sp -= 2;
            }
        }
        Ok(())
    }

    fn adjust_sp(&mut self, delta: i32) -> Result<(), RuntimeError> {
        let new_sp = self.sp as i64 + delta as i64;
        if new_sp < 0 || new_sp > STACK_SIZE as i64 {
            return Err(RuntimeError::new(format!("stack pointer out of range after adjusting by {}", delta)));
        }
        self.sp = new_sp as usize;
        Ok(())
    }

    fn checked_index_i64(&self, addr: i64) -> Result<i32, RuntimeError> {
        if addr < 0 || addr as usize >= self.stack.len() {
            return Err(RuntimeError::new(format!("address {} out of range", addr)));
        }
        Ok(self.stack[addr as usize])
    }

    fn write_checked_i64(&mut self, addr: i64, value: i32) -> Result<(), RuntimeError> {
        if addr < 0 || addr as usize >= self.stack.len() {
            return Err(RuntimeError::new(format!("address {} out of range", addr)));
        }
        self.stack[addr as usize] = value;
        Ok(())
    }

    fn exec_opr(&mut self, selector: i32) -> Result<(), RuntimeError> {
        match selector {
            opr::RET => {
                if self.bp == 0 {
                    return Err(RuntimeError::new("return with no active frame"));
                }
                let new_sp = self.bp - 1;
                let return_pc = self.checked_index(new_sp + 4)?;
                let saved_bp = self.checked_index(new_sp + 3)?;
                self.sp = new_sp;
                self.pc = return_pc as usize;
                self.bp = saved_bp as usize;
            }
            opr::INVERT => {
                let a = self.pop()?;
                self.push(-a)?;
            }
            opr::PLUS => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = a.checked_add(b).ok_or_else(|| RuntimeError::new("integer overflow in +"))?;
                self.push(result)?;
            }
            opr::MINUS => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(a.wrapping_sub(b))?;
            }
            opr::MUL => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = a.checked_mul(b).ok_or_else(|| RuntimeError::new("integer overflow in *"))?;
                self.push(result)?;
            }
            opr::DIV => {
                let b = self.pop()?;
                let a = self.pop()?;
                if b == 0 {
                    return Err(RuntimeError::new("division by zero"));
                }
                self.push(a.wrapping_div(b))?;
            }
            opr::ODD => {
                let a = self.pop()?;
                self.push(a.rem_euclid(2))?;
            }
            opr::MOD => {
                let b = self.pop()?;
                let a = self.pop()?;
                if b == 0 {
                    return Err(RuntimeError::new("division by zero"));
                }
                self.push(a.rem_euclid(b))?;
            }
            opr::EQ | opr::NEQ | opr::LESS | opr::LESS_EQ | opr::GRT | opr::GRT_EQ => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = match selector {
                    opr::EQ => a == b,
                    opr::NEQ => a != b,
                    opr::LESS => a < b,
                    opr::LESS_EQ => a <= b,
                    opr::GRT => a > b,
                    opr::GRT_EQ => a >= b,
                    _ => unreachable!(),
                };
                self.push(result as i32)?;
            }
            other => return Err(RuntimeError::new(format!("unknown OPR selector {}", other))),
        }
        Ok(())
    }

    fn read_integer(&mut self) -> Result<i32, RuntimeError> {
        let mut line = String::new();
        self.input.read_line(&mut line).map_err(|e| RuntimeError::new(format!("read failed: {}", e)))?;
        line.trim().parse::<i32>().map_err(|_| RuntimeError::new(format!("'{}' is not a valid integer", line.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction as I;

    fn run(code: Vec<I>) -> Vm<'static> {
        let leaked: &'static [I] = Box::leak(code.into_boxed_slice());
        let mut vm = Vm::new(leaked);
        vm.execute().expect("vm trapped");
        vm
    }

    #[test]
    fn literal_and_halt() {
        let vm = run(vec![I::new(Opcode::Lit, 0, 7), I::new(Opcode::Sio, 0, sio::HALT)]);
        assert_eq!(vm.sp, 1);
        assert_eq!(vm.stack[1], 7);
    }

    #[test]
    fn addition_computes_left_plus_right() {
        let vm = run(vec![
            I::new(Opcode::Lit, 0, 3),
            I::new(Opcode::Lit, 0, 4),
            I::new(Opcode::Opr, 0, opr::PLUS),
            I::new(Opcode::Sio, 0, sio::HALT),
        ]);
        assert_eq!(vm.stack[vm.sp], 7);
    }

    #[test]
    fn division_by_zero_traps() {
        let code = vec![
            I::new(Opcode::Lit, 0, 1),
            I::new(Opcode::Lit, 0, 0),
            I::new(Opcode::Opr, 0, opr::DIV),
        ];
        let leaked: &'static [I] = Box::leak(code.into_boxed_slice());
        let mut vm = Vm::new(leaked);
        assert!(vm.execute().is_err());
    }

    #[test]
    fn addition_overflow_traps() {
        let code = vec![
            I::new(Opcode::Lit, 0, i32::MAX),
            I::new(Opcode::Lit, 0, 1),
            I::new(Opcode::Opr, 0, opr::PLUS),
        ];
        let leaked: &'static [I] = Box::leak(code.into_boxed_slice());
        let mut vm = Vm::new(leaked);
        assert!(vm.execute().is_err());
    }

    #[test]
    fn store_and_load_round_trip_through_a_frame_slot() {
        let vm = run(vec![
            I::new(Opcode::Inc, 0, 5),
            I::new(Opcode::Lit, 0, 99),
            I::new(Opcode::Sto, 0, 4),
            I::new(Opcode::Lod, 0, 4),
            I::new(Opcode::Sio, 0, sio::HALT),
        ]);
        assert_eq!(vm.stack[vm.sp], 99);
    }

    #[test]
    fn call_and_return_restores_the_caller_frame() {
        // START
        //   INC 0,5
        //   JMP 0, 3      ; skip over the function body (index 2 only) to the call
        //   OPR 0, RET    ; function body: return immediately
        //   CAL 0,2       ; call the function at its own entry, index 2
        //   SIO 0, HALT
        let code = vec![
            I::new(Opcode::Inc, 0, 5),
            I::new(Opcode::Jmp, 0, 3),
            I::new(Opcode::Opr, 0, opr::RET),
            I::new(Opcode::Cal, 0, 2),
            I::new(Opcode::Sio, 0, sio::HALT),
        ];
        let leaked: &'static [I] = Box::leak(code.into_boxed_slice());
        let mut vm = Vm::new(leaked);
        vm.execute().expect("vm trapped");
        assert_eq!(vm.bp, 1);
        assert_eq!(vm.sp, 5, "RET must restore SP to its pre-call value");
    }

    #[test]
    fn array_store_then_load_through_absolute_address() {
        let vm = run(vec![
            I::new(Opcode::Inc, 0, 8),
            I::new(Opcode::Lit, 0, 1),  // index
            I::new(Opcode::Lit, 0, 4),  // array base address
            I::new(Opcode::Opr, 0, opr::PLUS),
            I::new(Opcode::Lit, 0, 55), // value
            I::new(Opcode::Sta, 0, 0),
            I::new(Opcode::Lit, 0, 1),
            I::new(Opcode::Lit, 0, 4),
            I::new(Opcode::Opr, 0, opr::PLUS),
            I::new(Opcode::Lda, 0, 0),
            I::new(Opcode::Sio, 0, sio::HALT),
        ]);
        assert_eq!(vm.stack[vm.sp], 55);
    }

    #[test]
    fn write_goes_through_the_injected_output_sink() {
        let code = [I::new(Opcode::Lit, 0, 42), I::new(Opcode::Sio, 0, sio::WRITE), I::new(Opcode::Sio, 0, sio::HALT)];
        let mut out = Vec::new();
        {
            let mut vm = Vm::new(&code).with_output(Box::new(&mut out));
            vm.execute().expect("vm trapped");
        }
        assert_eq!(String::from_utf8(out).unwrap(), "42\n");
    }

    #[test]
    fn read_pulls_from_the_injected_input_source() {
        let code = [I::new(Opcode::Sio, 0, sio::READ), I::new(Opcode::Sio, 0, sio::HALT)];
        let mut vm = Vm::new(&code).with_input(Box::new(io::Cursor::new(b"-5\n".to_vec())));
        vm.execute().expect("vm trapped");
        assert_eq!(vm.stack[vm.sp], -5);
    }
}
