//! IVM command-line interface.
//!
//! Commands:
//! - `ivm run <module> <export> [args...]` - Invoke an export with i32 arguments
//! - `ivm inspect <module>` - Print the module layout
//! - `ivm demo <output>` - Write a small sample module binary

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use ivm_common_core::{FunctionBuilder, Instruction, ModuleBuilder, Opcode, Register};
use ivm_hal::HalModule;
use ivm_vm::{Context, Execution, Module, Value, VmConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ivm")]
#[command(about = "Register-based bytecode VM", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke an exported function
    Run {
        /// Module binary
        module: PathBuf,
        /// Export name
        export: String,
        /// i32 arguments
        #[arg(allow_negative_numbers = true)]
        args: Vec<i32>,
        /// Maximum call depth
        #[arg(long, default_value_t = VmConfig::default().max_stack_depth)]
        max_depth: usize,
        /// Resumes allowed before a still-yielding execution is abandoned
        #[arg(long, default_value_t = 1000)]
        max_resumes: usize,
    },

    /// Print a module's imports, exports, functions and disassembly
    Inspect {
        /// Module binary
        module: PathBuf,
    },

    /// Write a sample module exporting `add` and `fill_sum`
    Demo {
        /// Output path
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            module,
            export,
            args,
            max_depth,
            max_resumes,
        } => cmd_run(&module, &export, &args, max_depth, max_resumes),
        Commands::Inspect { module } => cmd_inspect(&module),
        Commands::Demo { output } => cmd_demo(&output),
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> Result<std::sync::Arc<Module>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Module::load(&bytes).with_context(|| format!("loading {}", path.display()))
}

fn cmd_run(path: &Path, export: &str, args: &[i32], max_depth: usize, max_resumes: usize) -> Result<()> {
    let module = load(path)?;
    let hal = HalModule::default().instance()?;
    let config = VmConfig {
        max_stack_depth: max_depth,
    };
    let mut ctx = Context::new(module, vec![hal], config)?;

    let args: Vec<Value> = args.iter().copied().map(Value::I32).collect();
    let mut exec = ctx.invoke(export, &args)?;
    let mut resumes = 0;
    let values = loop {
        match exec {
            Execution::Returned(values) => break values,
            Execution::Yielded(cont) => {
                if resumes == max_resumes {
                    bail!("{} still yielding after {} resumes", export, resumes);
                }
                resumes += 1;
                debug!(resumes, "resuming");
                exec = ctx.resume(cont)?;
            }
        }
    };

    for value in &values {
        match value {
            Value::I32(v) => println!("i32 {}", v),
            Value::Ref(r) => println!("ref {}", r.type_name()),
        }
    }
    Ok(())
}

fn cmd_inspect(path: &Path) -> Result<()> {
    let module = load(path)?;
    println!("module {}", module.name());
    println!(
        "globals: {} i32, {} ref; rwdata {} bytes",
        module.global_i32_count(),
        module.global_ref_count(),
        module.rwdata_size()
    );
    for (i, segment) in module.rodata_segments().iter().enumerate() {
        println!("rodata {}: {} bytes", i, segment.len());
    }
    for (i, import) in module.imports().iter().enumerate() {
        println!("import {}: {}", i, import.full_name());
    }
    for export in module.exports() {
        println!("export {} -> function {}", export.name, export.function);
    }
    for (i, desc) in module.functions().iter().enumerate() {
        println!(
            "\nfunction {} ({} i32, {} ref, {} bytes):",
            i, desc.i32_register_count, desc.ref_register_count, desc.bytecode_length
        );
        let code = module.function_code(i as u32)?;
        disassemble(code);
    }
    Ok(())
}

fn disassemble(code: &[u8]) {
    let mut pc = 0;
    while let Some(inst) = Instruction::decode(code, pc) {
        let name = inst
            .opcode()
            .map_or_else(|| format!("op{:#04x}", inst.op), |op| format!("{:?}", op));
        let list: Vec<Register> = (0..inst.list_entries())
            .filter_map(|i| ivm_common_core::register::list_entry(code, pc, i))
            .map(Register::from_raw)
            .collect();
        if list.is_empty() {
            println!("  {:04x}  {:<20} a={} b={} c={}", pc, name, inst.a, inst.b, inst.c);
        } else {
            println!("  {:04x}  {:<20} a={} b={} c={} {:?}", pc, name, inst.a, inst.b, inst.c, list);
        }
        pc += inst.encoded_len();
    }
}

fn cmd_demo(output: &Path) -> Result<()> {
    let mut m = ModuleBuilder::new("demo");
    let allocate = m.import("hal.buffer.allocate");
    let fill = m.import("hal.buffer.fill");
    let load = m.import("hal.buffer.load");

    let mut add = FunctionBuilder::new(2, 0);
    add.binary(Opcode::AddI32, 0, 0, 1).ret(&[Register::i32(0)]);
    let add = m.function(add);
    m.export("add", add);

    // fill_sum(pattern): fill 8 bytes with `pattern`, return the sum of both words.
    let mut f = FunctionBuilder::new(4, 1);
    f.const_i32(1, 8)
        .call_import(allocate, &[Register::i32(1)], &[Register::reference(0)])
        .const_i32(2, 0)
        .call_import(
            fill,
            &[Register::reference(0), Register::i32(2), Register::i32(1), Register::i32(0)],
            &[],
        )
        .call_import(load, &[Register::reference(0), Register::i32(2)], &[Register::i32(3)])
        .const_i32(2, 4)
        .call_import(load, &[Register::reference(0), Register::i32(2)], &[Register::i32(2)])
        .binary(Opcode::AddI32, 0, 2, 3)
        .ret(&[Register::i32(0)]);
    let fill_sum = m.function(f);
    m.export("fill_sum", fill_sum);

    let bytes = m.to_bytes()?;
    fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    println!("wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}
