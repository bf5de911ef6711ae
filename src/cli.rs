use std::path::PathBuf;

use clap::Parser;

use crate::compiler::Options;

/// The TL-B schema analyzer
#[derive(Parser)]
#[command(name = "tlbc")]
#[command(version)]
#[command(about = "Analyzes TL-B schemes and derives constructor dispatch plans", long_about = None)]
pub struct Cli {
    /// Schema file to compile.
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Read the schema from standard input instead of a file.
    #[arg(long = "stdin")]
    pub stdin: bool,

    /// Warn when an explicit constructor tag differs from the derived one,
    /// and when a missing tag is auto-assigned.
    #[arg(short = 't', long = "tag-warnings")]
    pub tag_warnings: bool,

    /// Dump the fully analyzed schema.
    #[arg(short = 'd', long = "dump")]
    pub dump: bool,

    /// Write output to FILE instead of standard output.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Check the schema only, produce no output.
    #[arg(short = 'q', long = "check-only")]
    pub check_only: bool,

    /// Request declarations only from the code generation backend.
    #[arg(long = "headers-only")]
    pub headers_only: bool,

    /// Request implementations only from the code generation backend.
    #[arg(long = "impl-only")]
    pub impl_only: bool,

    /// Enable color and formatting in diagnostics.
    #[arg(long = "pretty", default_value_t = true)]
    pub pretty: bool,

    /// Increase verbosity; repeat for more detail.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// What the (external) code generation backend is asked to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenMode {
    Both,
    HeadersOnly,
    ImplOnly,
}

impl Cli {
    pub fn to_options(&self) -> Options {
        Options {
            show_tag_warnings: self.tag_warnings || self.verbose >= 3,
            pretty: self.pretty,
        }
    }

    pub fn codegen_mode(&self) -> CodegenMode {
        match (self.headers_only, self.impl_only) {
            (true, false) => CodegenMode::HeadersOnly,
            (false, true) => CodegenMode::ImplOnly,
            _ => CodegenMode::Both,
        }
    }
}
