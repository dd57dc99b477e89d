use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gcdisc")]
#[command(about = "GameCube disc image archive tool", version)]
pub struct Args {
    /// Path to the GameCube disc image
    pub image: PathBuf,

    /// What to do with the image
    #[arg(value_enum)]
    pub action: Action,

    /// Also emit the system region as a synthetic system.bin file
    #[arg(long)]
    pub with_system_files: bool,

    /// Repack the data region to remove gaps before running the action
    #[arg(long)]
    pub defragment: bool,

    /// Output directory (extract) or output image path (save)
    #[arg(short, long, value_name = "PATH", required_if_eq("action", "save"))]
    pub output: Option<PathBuf>,

    /// Enables debug logging (use -vv for trace logging)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(ValueEnum, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    /// Extract every file in the image into the output directory
    Extract,
    /// Rebuild the image into a new file
    Save,
}
