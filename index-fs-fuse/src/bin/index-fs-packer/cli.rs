use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Host directory whose tree is copied into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output directory
    #[arg(long, short = 'O')]
    pub out_dir: PathBuf,

    /// Image size in 512-byte blocks
    #[arg(long, short, default_value_t = 16 * 2048)]
    pub blocks: usize,
}
