// ABOUTME: Version info and REPL cosmetics; the interpreter has no sandboxing config

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const WELCOME_MESSAGE: &str = "effect-lisp";
pub const WELCOME_SUBTITLE: &str = "a small homoiconic lisp with macros and algebraic effects";
pub const PROMPT: &str = "eff> ";
pub const HISTORY_FILE: &str = ".effect_lisp_history";

pub const HELP_TEXT: &str = r#"
Enter an expression to evaluate it. Ctrl-D (or an empty line followed by
Ctrl-D) exits the REPL. Scripts can also be run non-interactively:

  effect-lisp path/to/program.eff
"#;
