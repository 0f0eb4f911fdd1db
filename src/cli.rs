use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sbscript",
    about = "Compiles a folder of .sbs sprite sources into a Scratch project archive."
)]
pub struct Args {
    #[arg(value_name = "FOLDER", help = "Folder containing .sbs source files.")]
    pub folder: PathBuf,

    #[arg(
        value_name = "OUTPUT",
        help = "Output .sb3 path. Defaults to <folder>/<folder name>.sb3."
    )]
    pub output: Option<PathBuf>,
}
