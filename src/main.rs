// ABOUTME: CLI entry point: a one-shot script runner and an interactive REPL

use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use effect_lisp::builtins;
use effect_lisp::config::{self, HISTORY_FILE, PROMPT, VERSION, WELCOME_MESSAGE, WELCOME_SUBTITLE};
use effect_lisp::demacro;
use effect_lisp::error::EvalError;
use effect_lisp::eval::Evaluator;
use effect_lisp::frame::HandlerFrame;
use effect_lisp::import::{Folder, Importer, Searchable};
use effect_lisp::parser::{self, llq_to_ast};
use effect_lisp::scope::Scope;
use effect_lisp::value::Value;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};

/// A small homoiconic lisp with macros and algebraic effect handlers.
#[derive(Parser, Debug)]
#[command(name = "effect-lisp")]
#[command(version = VERSION)]
#[command(about = "A homoiconic lisp with macros and algebraic effect handlers")]
struct CliArgs {
    /// Script file to execute (if omitted, starts the REPL)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,
}

struct Session {
    evaluator: Evaluator,
    scope: Scope,
    handler_frame: Rc<HandlerFrame>,
}

impl Session {
    fn new() -> Session {
        let root_file: Rc<dyn Searchable> = Rc::new(Folder::new("root"));
        let importer = Rc::new(Importer::new(Rc::clone(&root_file)));
        let evaluator = Evaluator::new(importer);
        let (scope, handler_frame) = builtins::install(Scope::root(root_file));
        Session {
            evaluator,
            scope,
            handler_frame,
        }
    }

    /// Runs every top-level form in `source` in turn: demacro the whole
    /// program together (so a macro defined by one form is visible to a
    /// later one), then convert each to the executable AST and evaluate.
    /// Returns the last form's value.
    fn run(&mut self, source: &str) -> Result<Value, EvalError> {
        let forms = parser::parse_program(source)?;
        let expanded_forms = demacro::expand_program(&mut self.evaluator, &forms, &self.scope)?;
        let mut result = Value::Unit;
        for expanded in expanded_forms {
            let ast = llq_to_ast(&expanded);
            result = self.evaluator.eval_in(
                ast,
                self.scope.clone(),
                Some(Rc::clone(&self.handler_frame)),
            )?;
        }
        Ok(result)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = CliArgs::parse();
    let mut session = Session::new();

    if let Some(script_path) = args.script {
        run_script(&script_path, &mut session)?;
        return Ok(());
    }

    repl(&mut session)
}

fn run_script(path: &PathBuf, session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read script file {}: {e}", path.display()))?;
    session
        .run(&contents)
        .map_err(|e| format!("evaluation error: {e}"))?;
    Ok(())
}

fn repl(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let rl_config = Config::builder().auto_add_history(true).build();
    let mut rl: Editor<(), rustyline::history::DefaultHistory> =
        Editor::with_config(rl_config).map_err(|e| format!("failed to initialize REPL: {e}"))?;
    let _ = rl.load_history(HISTORY_FILE);

    println!("{WELCOME_MESSAGE}");
    println!("{WELCOME_SUBTITLE}");
    println!("{}", config::HELP_TEXT.trim());

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match session.run(&line) {
                    Ok(value) => match value.serialize() {
                        Ok(text) => println!("=> {text}"),
                        Err(_) => println!("=> {}", value.error_dump()),
                    },
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\ngoodbye");
                break;
            }
            Err(err) => {
                eprintln!("error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}
