//! Round-robin scheduling demo.
//!
//! Starts a two-core engine, submits a couple of hand-built processes, lets
//! the batch producer add more, and prints the final accounting.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use emuos::{Instruction, Operand, Word};
use emuos_engine::process::Process;
use emuos_engine::{Engine, EngineConfig};

fn counting_program(rounds: u32) -> Vec<Instruction> {
    vec![
        Instruction::Declare {
            name: "total".into(),
            value: Word::ZERO,
        },
        Instruction::For {
            body: vec![Instruction::Add {
                dest: "total".into(),
                lhs: Operand::var("total"),
                rhs: Operand::imm(1u16),
            }],
            repeat: rounds,
        },
        Instruction::Print {
            var: Some("total".into()),
        },
    ]
}

fn main() {
    env_logger::init();

    let mut config = EngineConfig::default();
    for (key, value) in [
        ("num-cpu", "2"),
        ("scheduler", "rr"),
        ("quantum-cycles", "4"),
        ("batch-process-freq", "20"),
        ("min-ins", "5"),
        ("max-ins", "10"),
        ("min-mem-per-proc", "512"),
        ("max-mem-per-proc", "512"),
    ] {
        config.apply(key, value).expect("static demo config");
    }

    let mut engine = Engine::start(config).expect("engine start");

    let counter = Arc::new(Process::with_program("counter", counting_program(25), 512));
    engine.submit(Arc::clone(&counter));
    engine.start_batch();

    thread::sleep(Duration::from_millis(250));
    engine.stop_batch();

    while !counter.is_finished() {
        thread::sleep(Duration::from_millis(10));
    }

    println!("counter logs:");
    for line in counter.log_lines().iter().rev().take(1) {
        println!("  {line}");
    }

    println!(
        "busy cores: {}, ready queue: {}",
        engine.busy_cores(),
        engine.ready_count()
    );
    for view in engine.processes() {
        println!(
            "  {:<10} {:<9} {:>3}/{:<3} dispatched {}x",
            view.name,
            view.state.to_string(),
            view.completed,
            view.total,
            view.dispatches
        );
    }

    engine.stop();
    println!("engine stopped; all threads joined");
}
