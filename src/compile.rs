use std::fs;
use std::io::Read;

use crate::cli::{Cli, CodegenMode};
use crate::compiler::analysis::check_scheme;
use crate::compiler::diagnostics::Error;
use crate::compiler::parser::parse_source;
use crate::compiler::schema::Schema;
use crate::compiler::Compiler;

/// One schema source held in memory.
pub struct SourceFile {
    pub file_name: String,
    pub text: String,
}

/// Reads the input named on the command line, or standard input.
pub fn read_source(cli: &Cli) -> Result<SourceFile, String> {
    if cli.stdin {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("cannot read standard input: {}", e))?;
        return Ok(SourceFile {
            file_name: "stdin".to_string(),
            text,
        });
    }
    let Some(path) = &cli.file else {
        return Err("no source files, no output".to_string());
    };
    let text = fs::read_to_string(path)
        .map_err(|_| format!("cannot open source file `{}`", path.display()))?;
    Ok(SourceFile {
        file_name: path.display().to_string(),
        text,
    })
}

/// Runs the whole pipeline over one source. Returns the process exit code:
/// 0 on success, 1 on any compilation error.
pub fn compile(cli: &Cli) -> i32 {
    let source = match read_source(cli) {
        Ok(source) => source,
        Err(msg) => {
            eprintln!("fatal: {}", msg);
            return 1;
        }
    };
    let mut comp = Compiler::new(cli.to_options());
    comp.file_name = source.file_name.clone();
    let result =
        parse_source(&mut comp, &source.text).and_then(|()| check_scheme(&mut comp));
    if let Err(err) = result {
        print_diagnostic(&source.file_name, &err, cli.pretty);
        return 1;
    }
    let schema = Schema::new(&comp);
    if cli.check_only {
        return 0;
    }
    // With no backend linked in, a codegen request is served as a dump of
    // the analyzed schema; the mode is recorded for external backends.
    let codegen_requested = cli.codegen_mode() != CodegenMode::Both;
    if cli.dump || cli.verbose > 0 || cli.output.is_some() || codegen_requested {
        let dump = schema.dump();
        match &cli.output {
            Some(path) => {
                if let Err(e) = fs::write(path, dump) {
                    eprintln!("fatal: cannot write `{}`: {}", path.display(), e);
                    return 1;
                }
            }
            None => print!("{}", dump),
        }
    }
    0
}

/// Prints a compilation error with its notes in `file:line:col` shape.
pub fn print_diagnostic(file_name: &str, err: &Error, pretty: bool) {
    let color_start = if pretty { "\x1b[31m" } else { "" };
    let color_end = if pretty { "\x1b[0m" } else { "" };
    eprintln!(
        "{}{}:{}: error: {}{}",
        color_start, file_name, err.loc, err.kind, color_end
    );
    for note in &err.notes {
        eprintln!("{}:{}: note: {}", file_name, note.loc, note.message);
    }
}
