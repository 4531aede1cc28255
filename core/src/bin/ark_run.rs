/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Enclave Runtime.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use ark_enclave::compiler;
use ark_enclave::eval::Interpreter;
use ark_enclave::intrinsics::IntrinsicRegistry;
use ark_enclave::loader::load_program;
use ark_enclave::runtime::Scope;
use ark_enclave::sandbox::Policy;
use ark_enclave::vm::Vm;
use std::env;
use std::fs;
use std::process::ExitCode;
use std::rc::Rc;

const USAGE: &str = "Usage: ark_run run <program.json> [--engine vm|interp]";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args[1] != "run" {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    }

    let path = &args[2];
    let mut engine = env::var("ARK_ENGINE").unwrap_or_else(|_| "vm".to_string());
    let mut rest = args[3..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--engine" => match rest.next() {
                Some(name) => engine = name.clone(),
                None => {
                    eprintln!("{}", USAGE);
                    return ExitCode::FAILURE;
                }
            },
            _ => {
                eprintln!("{}", USAGE);
                return ExitCode::FAILURE;
            }
        }
    }

    let json = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("ParseError: cannot read '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    // Integrity gate: nothing executes unless the whole unit verifies.
    let program = match load_program(&json) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let policy = Rc::new(Policy::from_env());
    let registry = IntrinsicRegistry::with_defaults(policy);
    let scope = Scope::new();

    let result = match engine.as_str() {
        "interp" => Interpreter::new(&registry).run(&program, &scope),
        "vm" => match compiler::compile(&program.content) {
            Ok(compiled) => Vm::new(&registry).run(&compiled, &scope),
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        other => {
            eprintln!("ParseError: unknown engine '{}': expected vm or interp", other);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
