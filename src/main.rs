//! Debug runner for contract binaries.
//!
//! Loads a binary and executes one method against a fresh in-memory store.
//!
//! # Usage
//! ```text
//! contract_engine <binary-file> [OPTIONS]
//! ```
//!
//! # Options
//! - `--entry <method>`: Method to call (defaults to `main`)
//! - `--arg <n>`: Integer argument, repeatable
//! - `--credits <n>`: Credit budget (defaults to 1,000,000)
//! - `--read-only`: Reject every storage mutation
//! - `--dump`: Print interpreter memory after the call
//!
//! The log level is read from `ENGINE_LOG_LEVEL`.

use contract_engine::core::config::EngineConfig;
use contract_engine::core::execution::{CallParams, execute_call};
use contract_engine::error;
use contract_engine::storage::memory_storage::InMemoryStorage;
use contract_engine::types::address::ContractAddress;
use contract_engine::types::value::Value;
use contract_engine::virtual_machine::program::Binary;
use std::env;
use std::process;

const DEFAULT_CREDITS: u64 = 1_000_000;

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = program_name(&args);

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(program);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let path = &args[1];
    let mut entry = "main".to_string();
    let mut call_args: Vec<Value> = Vec::new();
    let mut credits = DEFAULT_CREDITS;
    let mut read_only = false;
    let mut dump = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--entry" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--entry requires an argument");
                    process::exit(1);
                }
                entry = args[i].clone();
                i += 1;
            }
            "--arg" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--arg requires an argument");
                    process::exit(1);
                }
                match args[i].parse::<u64>() {
                    Ok(n) => call_args.push(Value::int(n)),
                    Err(_) => {
                        eprintln!("Invalid integer argument: {}", args[i]);
                        process::exit(1);
                    }
                }
                i += 1;
            }
            "--credits" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--credits requires an argument");
                    process::exit(1);
                }
                credits = match args[i].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Invalid credit budget: {}", args[i]);
                        process::exit(1);
                    }
                };
                i += 1;
            }
            "--read-only" => {
                read_only = true;
                i += 1;
            }
            "--dump" => {
                dump = true;
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(program);
                process::exit(1);
            }
        }
    }

    let config = EngineConfig::from_env();
    config.apply_logging();

    let binary = match Binary::from_file(path) {
        Ok(binary) => binary,
        Err(e) => {
            error!("Failed to load {}: {}", path, e);
            process::exit(1);
        }
    };

    let contract = ContractAddress::derive(path.as_bytes());
    let mut params = CallParams::new(contract, entry.as_str(), credits).with_args(call_args);
    if read_only {
        params = params.read_only();
    }
    if dump {
        params = params.with_memory_dump();
    }

    let mut storage = InMemoryStorage::new();
    let outcome = match execute_call(&mut storage, &binary, &params, &config, None) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    println!("contract:     {}", contract);
    match &outcome.error {
        None => println!("status:       success"),
        Some(record) => println!(
            "status:       aborted (code {} at offset {}, line {}): {}",
            record.code.as_u16(),
            record.offset,
            record.line,
            record.message
        ),
    }
    match &outcome.return_value {
        Some(value) => println!("return:       {}", value),
        None => println!("return:       none"),
    }
    println!("credits used: {} / {}", outcome.credits_used, credits);
    for (category, amount) in outcome.profile.iter() {
        println!("  {:<14} {}", category.as_str(), amount);
    }
    println!(
        "storage:      {} reads ({} bytes), {} writes ({} bytes)",
        outcome.usage.reads,
        outcome.usage.bytes_read,
        outcome.usage.writes,
        outcome.usage.bytes_written
    );
    println!("fee:          {}", outcome.fee);

    if let Some(memory) = &outcome.memory_dump {
        println!("\n{memory}");
    }
    if outcome.is_success() && !read_only {
        let cells = storage.cells(&contract);
        println!("\ncommitted cells ({}):", cells.len());
        for (cell, value) in cells {
            println!("  {} = {}", cell, value);
        }
    }

    process::exit(if outcome.is_success() { 0 } else { 2 });
}

/// Name to show in usage text; argv may be empty.
fn program_name(args: &[String]) -> &str {
    args.first().map(String::as_str).unwrap_or("contract_engine")
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <binary-file> [OPTIONS]\n", program);
    eprintln!("Options:");
    eprintln!("  --entry <method>  Method to call (default: main)");
    eprintln!("  --arg <n>         Integer argument, repeatable");
    eprintln!("  --credits <n>     Credit budget (default: {})", DEFAULT_CREDITS);
    eprintln!("  --read-only       Reject every storage mutation");
    eprintln!("  --dump            Print interpreter memory after the call");
}
