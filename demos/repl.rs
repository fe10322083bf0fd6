use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use schemelet::ast::Value;
use schemelet::{Interpreter, indent_level};
use std::panic;
use std::process;

fn main() {
    schemelet::init_tracing();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("Schemelet - a small Scheme with actors");
    println!("Enter expressions like: (+ 1 2)");
    println!("Files given on the command line are loaded first.");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let interp = Interpreter::new();

    for path in std::env::args().skip(1) {
        if let Err(e) = interp.load_file(&path) {
            println!("*** ERROR: {e}");
        }
    }

    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "scheme> " } else { "...... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    match command {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&interp);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                // Keep reading while parentheses are unbalanced
                if indent_level(&pending) > 0 {
                    continue;
                }

                let source = std::mem::take(&mut pending);
                let _ = rl.add_history_entry(source.trim());
                for result in interp.evaluate_source(&source) {
                    println!("{result}");
                }
            }

            Err(ReadlineError::Interrupted) => {
                // Discard a partially entered expression
                pending.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Schemelet REPL:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current toplevel bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Discard the current input");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  quote define lambda let let* letrec set! if cond and or begin do");
    println!("  define-macro actor");
    println!();
    println!("Examples:");
    println!("  (define (square x) (* x x))");
    println!("  (let ((x 1) (y 2)) (+ x y))");
    println!("  (do ((i 0 (+ i 1))) ((= i 3) 'done))");
    println!("  (define a (actor ((\"show\" v) (set! last v))))");
    println!("  (a start)");
    println!("  (a ! \"show\" 42)");
    println!();
}

fn print_environment(interp: &Interpreter) {
    let bindings = interp.bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-ins from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Subroutine(_) | Value::Syntax(_) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in procedures and syntax ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
