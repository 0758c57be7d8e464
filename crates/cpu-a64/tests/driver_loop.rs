//! Driver-loop integration tests: whole programs executed through the
//! fetch-decode-dispatch cycle with a table-backed stand-in for the
//! external decoder.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use a64_core::{Decode, END_OF_SIM_ADDRESS, Instruction, InstructionGroup};
use cpu_a64::{Fault, Reg31Mode, SimConfig, Simulator, TraceCategories};

/// Decoder stand-in: classifies by exact word match, the way the test
/// programs were assembled.
struct TableDecoder {
    groups: HashMap<u32, InstructionGroup>,
}

impl TableDecoder {
    fn new() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }
}

impl Decode for TableDecoder {
    fn decode(&self, instr: &Instruction) -> InstructionGroup {
        *self
            .groups
            .get(&instr.raw())
            .unwrap_or(&InstructionGroup::Unallocated)
    }
}

const TEXT_BASE: u64 = 0x1_0000;

/// Load a program, wire up the decoder table, set the pc.
fn prepare(sim: &mut Simulator, program: &[(u32, InstructionGroup)]) -> TableDecoder {
    let mut decoder = TableDecoder::new();
    for (offset, (raw, group)) in program.iter().enumerate() {
        sim.mem_mut()
            .load(TEXT_BASE + 4 * offset as u64, &raw.to_le_bytes());
        decoder.groups.insert(*raw, *group);
    }
    sim.regs.pc = TEXT_BASE;
    decoder
}

#[derive(Clone)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("sink lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn counting_loop_runs_to_the_sentinel() {
    use InstructionGroup as G;
    let mut sim = Simulator::new(SimConfig::default());
    let program = [
        (0xd280_0000, G::MoveWideImmediate), // movz x0, #0
        (0xd280_0141, G::MoveWideImmediate), // movz x1, #10
        (0x9100_0400, G::AddSubImmediate),   // loop: add x0, x0, #1
        (0xd100_0421, G::AddSubImmediate),   // sub x1, x1, #1
        (0xb5ff_ffc1, G::CompareBranch),     // cbnz x1, loop
        (0xd65f_03c0, G::UnconditionalBranchToRegister), // ret (lr = sentinel)
    ];
    let decoder = prepare(&mut sim, &program);
    sim.run(&decoder).expect("program should run to completion");

    assert_eq!(sim.regs.pc, END_OF_SIM_ADDRESS);
    assert_eq!(sim.regs.x(0, Reg31Mode::ZeroRegister), 10);
    assert_eq!(sim.regs.x(1, Reg31Mode::ZeroRegister), 0);
    // 2 setup + 10 iterations of 3 + final ret.
    assert_eq!(sim.instructions_executed(), 33);
}

#[test]
fn call_and_return_through_the_link_register() {
    use InstructionGroup as G;
    let mut sim = Simulator::new(SimConfig::default());
    let program = [
        (0x9400_0003, G::UnconditionalBranch), // bl +12 (to the callee)
        (0xd280_0542, G::MoveWideImmediate),   // movz x2, #42 (after return)
        (0xd65f_03c0, G::UnconditionalBranchToRegister), // ret
        (0xd280_0281, G::MoveWideImmediate),   // callee: movz x1, #20
    ];
    let decoder = prepare(&mut sim, &program);

    sim.step(&decoder).expect("bl");
    assert_eq!(sim.regs.pc, TEXT_BASE + 12);
    assert_eq!(sim.regs.lr(), TEXT_BASE + 4);

    sim.step(&decoder).expect("callee movz");
    // The callee shares the top-level ret; point execution at it.
    sim.regs.pc = TEXT_BASE + 8;
    sim.step(&decoder).expect("ret");
    assert_eq!(sim.regs.pc, TEXT_BASE + 4, "ret follows the BL-written lr");
    assert_eq!(sim.regs.x(1, Reg31Mode::ZeroRegister), 20);
}

#[test]
fn unallocated_word_faults_with_opcode() {
    let mut sim = Simulator::new(SimConfig::default());
    let decoder = TableDecoder::new();
    sim.mem_mut().load(TEXT_BASE, &0xdead_beef_u32.to_le_bytes());
    sim.regs.pc = TEXT_BASE;
    let err = sim.step(&decoder).unwrap_err();
    assert_eq!(
        err,
        Fault::Unallocated {
            pc: TEXT_BASE,
            raw: 0xdead_beef
        }
    );
}

#[test]
fn movprfx_latch_spans_exactly_one_instruction() {
    use InstructionGroup as G;
    let mut sim = Simulator::new(SimConfig::default());
    let program = [
        (0x0420_bc20, G::SveMovprfx),        // movprfx z0, z1
        (0xd280_0000, G::MoveWideImmediate), // movz x0, #0
        (0xd280_0000, G::MoveWideImmediate),
    ];
    let decoder = prepare(&mut sim, &program);

    sim.step(&decoder).expect("movprfx");
    assert!(sim.movprfx_latched(), "latch set right after MOVPRFX");
    sim.step(&decoder).expect("consumer");
    assert!(
        !sim.movprfx_latched(),
        "latch cleared after the next instruction regardless of its kind"
    );
}

#[test]
fn bti_violation_on_guarded_pages() {
    use InstructionGroup as G;
    let config = SimConfig {
        guarded_pages: true,
        ..SimConfig::default()
    };
    let mut sim = Simulator::new(config);
    let program = [
        (0xd61f_0200, G::UnconditionalBranchToRegister), // br x16
        (0x9100_0400, G::AddSubImmediate), // target without BTI: add x0, x0, #1
    ];
    let decoder = prepare(&mut sim, &program);
    sim.regs.set_x(16, TEXT_BASE + 4, Reg31Mode::ZeroRegister);

    sim.step(&decoder).expect("br itself is fine");
    let err = sim.step(&decoder).unwrap_err();
    assert!(matches!(err, Fault::BtiViolation { .. }));
}

#[test]
fn bti_c_accepts_an_incoming_call() {
    use InstructionGroup as G;
    let config = SimConfig {
        guarded_pages: true,
        ..SimConfig::default()
    };
    let mut sim = Simulator::new(config);
    let program = [
        (0xd61f_0200, G::UnconditionalBranchToRegister), // br x16
        (0xd503_245f, G::Hint),                          // target: bti c
        (0xd65f_03c0, G::UnconditionalBranchToRegister), // ret -> sentinel
    ];
    let decoder = prepare(&mut sim, &program);
    sim.regs.set_x(16, TEXT_BASE + 4, Reg31Mode::ZeroRegister);
    sim.run(&decoder)
        .expect("BTI c accepts a branch through x16");
}

#[test]
fn trace_stream_reports_register_writes() {
    use InstructionGroup as G;
    let mut sim = Simulator::new(SimConfig::default());
    let buffer = Arc::new(Mutex::new(Vec::new()));
    sim.set_trace_sink(Box::new(SharedSink(Arc::clone(&buffer))));
    sim.set_trace_categories(TraceCategories::ALL);

    let program = [(0xd280_0540, G::MoveWideImmediate)]; // movz x0, #42
    let decoder = prepare(&mut sim, &program);
    sim.step(&decoder).expect("movz");

    let text = String::from_utf8(buffer.lock().expect("sink lock").clone()).expect("utf8");
    assert!(text.contains("MoveWideImmediate"), "disasm line: {text}");
    assert!(
        text.contains("x0: 0x000000000000002a"),
        "register line: {text}"
    );
}

#[test]
fn stores_emit_rich_trace_lines_not_register_lines() {
    use InstructionGroup as G;
    let mut sim = Simulator::new(SimConfig::default());
    let buffer = Arc::new(Mutex::new(Vec::new()));
    sim.set_trace_sink(Box::new(SharedSink(Arc::clone(&buffer))));
    sim.set_trace_categories(TraceCategories::ALL);

    sim.regs.set_x(1, 0x2_0000, Reg31Mode::ZeroRegister);
    sim.regs.set_x(0, 0xabcd, Reg31Mode::ZeroRegister);
    let program = [
        (0xf900_0020, G::LoadStoreUnsignedOffset), // str x0, [x1]
        (0xf940_0022, G::LoadStoreUnsignedOffset), // ldr x2, [x1]
    ];
    let decoder = prepare(&mut sim, &program);
    sim.step(&decoder).expect("str");
    sim.step(&decoder).expect("ldr");

    let text = String::from_utf8(buffer.lock().expect("sink lock").clone()).expect("utf8");
    assert!(
        text.contains("0x0000000000020000"),
        "memory line carries the address: {text}"
    );
    assert_eq!(sim.regs.x(2, Reg31Mode::ZeroRegister), 0xabcd);
}

#[test]
fn vector_length_is_fixed_after_first_run() {
    let mut sim = Simulator::new(SimConfig {
        vl_bits: 256,
        ..SimConfig::default()
    });
    assert_eq!(sim.vl_bits(), 256);
    sim.set_vector_length_in_bits(512);
    assert_eq!(sim.vl_bits(), 512);

    let decoder = TableDecoder::new();
    sim.mem_mut().load(TEXT_BASE, &0xd280_0000_u32.to_le_bytes());
    sim.regs.pc = TEXT_BASE;
    let _ = sim.step(&decoder);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        sim.set_vector_length_in_bits(128);
    }));
    assert!(result.is_err(), "changing VL after running must panic");
}
