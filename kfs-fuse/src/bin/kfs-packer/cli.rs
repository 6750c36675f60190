use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Image file to create
    #[arg(long, short, default_value = "fs.img")]
    pub image: PathBuf,

    /// Total blocks of the volume
    #[arg(long, short, default_value_t = 4096)]
    pub blocks: u32,

    /// Number of inodes
    #[arg(long, short = 'n', default_value_t = 200)]
    pub inodes: u32,

    /// Blocks reserved for the log
    #[arg(long, short, default_value_t = 30)]
    pub log: u32,

    /// Host files copied into the root directory
    pub files: Vec<PathBuf>,
}
