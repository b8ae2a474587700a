mod cli;

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use block_dev::BLOCK_SIZE;
use clap::Parser;
use cli::Cli;
use index_fs::FileSys;
use index_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nout_dir={:?}", cli.source, cli.out_dir);

    let block_file = Arc::new(BlockFile::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(cli.out_dir.join("fs.img"))?;
        fd.set_len((cli.blocks * BLOCK_SIZE) as u64)?;

        fd
    })?);

    let fs = FileSys::init(block_file, true).map_err(io::Error::other)?;
    index_fs_fuse::pack(&fs, &cli.source, "/")?;

    let free = fs.free_map().lock().free_count().map_err(io::Error::other)?;
    println!("{free} of {} blocks free", cli.blocks);
    fs.done();

    Ok(())
}
