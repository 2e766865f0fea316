//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use clap_complete::Shell;

/// codesave - Snapshot Python codebases into portable zip archives
#[derive(Parser)]
#[command(name = "codesave")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save a codebase and extra libraries to a zip archive
    Save(SaveArgs),

    /// Nest an archive under a unique prefix and rewrite its imports
    Unique(UniqueArgs),

    /// Build an archive that runs with `python archive.pyz`
    #[command(name = "make-pyz")]
    MakePyz(MakePyzArgs),

    /// Restore an archive as a plain directory
    Extract(ExtractArgs),

    /// Show the libraries and layout of an archive
    Info(InfoArgs),

    /// Run an executable archive with the Python interpreter
    Run(RunArgs),

    /// Fetch an archive saved to a tracked run
    Download(DownloadArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("inputs")
        .required(true)
        .multiple(true)
        .args(["codebase", "extra_libraries"])
))]
pub struct SaveArgs {
    /// Output zip file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Directory whose top-level entries are all saved
    #[arg(long)]
    pub codebase: Option<PathBuf>,

    /// Extra search roots whose libraries are saved too
    #[arg(long, num_args = 1..)]
    pub extra_pythonpath: Vec<PathBuf>,

    /// Extra library files or directories to save
    #[arg(long, num_args = 1..)]
    pub extra_libraries: Vec<PathBuf>,

    /// Only save Python files
    #[arg(long)]
    pub only_py: bool,

    /// Skip files larger than this size (e.g. 500k, 10m, 1g)
    #[arg(long)]
    pub ignore_larger_than: Option<String>,

    /// Glob patterns of names to leave out
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Do not add the default __main__.py
    #[arg(long)]
    pub no_main: bool,

    /// Record `pip freeze` output as packages.txt
    #[arg(long)]
    pub record_packages: bool,
}

#[derive(Args)]
pub struct UniqueArgs {
    /// Archive to namespace
    pub input: PathBuf,

    /// Output zip file (defaults to <input>_unique.zip)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Prefix to nest under (defaults to codebase_<timestamp>)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Rewrite imports in non-Python files too
    #[arg(long)]
    pub rewrite_non_code: bool,

    /// Do not add __init__.py markers
    #[arg(long)]
    pub no_init: bool,

    /// Allow namespacing an archive that is already namespaced
    #[arg(long)]
    pub allow_nested: bool,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("launcher")
        .required(true)
        .args(["main_file", "main_member", "module"])
))]
pub struct MakePyzArgs {
    /// Codebase directory or existing archive
    pub input: PathBuf,

    /// Output archive (defaults to <directory>.pyz, or the input archive itself)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// File whose contents become __main__.py
    #[arg(long)]
    pub main_file: Option<PathBuf>,

    /// Archive member copied to __main__.py
    #[arg(long)]
    pub main_member: Option<String>,

    /// Module run as the program's top-level module
    #[arg(long)]
    pub module: Option<String>,
}

#[derive(Args)]
pub struct ExtractArgs {
    /// Archive to extract
    pub archive: PathBuf,

    /// Destination directory (defaults to the archive name without extension)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write library_names.json and packages.txt
    #[arg(long)]
    pub keep_metadata: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Archive to inspect
    pub archive: PathBuf,

    /// List every entry
    #[arg(long)]
    pub entries: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Executable archive
    pub archive: PathBuf,

    /// Python interpreter to use
    #[arg(long, env = "CODESAVE_PYTHON")]
    pub python: Option<PathBuf>,

    /// Arguments passed to the archive
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args)]
pub struct DownloadArgs {
    /// Run identifier
    pub run: String,

    /// Directory holding tracked runs
    #[arg(long)]
    pub store: PathBuf,

    /// File name saved to the run
    #[arg(long, default_value = "codebase.zip")]
    pub filename: String,

    /// Where to write the file (defaults to a temporary .zip)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
