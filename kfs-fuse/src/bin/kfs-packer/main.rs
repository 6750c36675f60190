mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use clap::Parser;
use cli::Cli;
use kfs::{BLOCK_SIZE, BlockCache, Context, FileSystem, MkfsConfig, OpenFlag, ROOTDEV, WriteThrough};
use kfs_fuse::BlockFile;
use log::info;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let block_file = Arc::new(BlockFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.image)?;
        fd.set_len(cli.blocks as u64 * BLOCK_SIZE as u64)?;

        fd
    })));

    let cache = Arc::new(BlockCache::default());
    cache.attach(ROOTDEV, block_file);
    let config = MkfsConfig {
        total_blocks: cli.blocks,
        ninodes: cli.inodes,
        nlog: cli.log,
    };
    let fs = FileSystem::format(&cache, ROOTDEV, Arc::new(WriteThrough), config).map_err(fs_error)?;

    let mut ctx = Context::new(&fs);
    for path in &cli.files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file name isn't UTF-8"))?;
        let data = fs::read(path)?;

        let fd = ctx
            .open(name, OpenFlag::CREATE | OpenFlag::WRONLY | OpenFlag::TRUNC)
            .map_err(fs_error)?;
        let written = ctx.write(fd, &data).map_err(fs_error)?;
        ctx.close(fd).map_err(fs_error)?;
        if written != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::StorageFull,
                format!("{name}: only {written} of {} bytes fit", data.len()),
            ));
        }
        info!("packed {name}: {written} bytes");
    }

    let entries = {
        let op = fs.begin_op();
        let entries = fs.root().lock().dir_entries();
        drop(op);
        entries.map_err(fs_error)?
    };
    for entry in entries {
        println!("{:>4} {}", entry.inode, entry.name);
    }
    println!(
        "free blocks {}, free inodes {}",
        fs.free_blocks(),
        fs.free_inodes()
    );

    Ok(())
}

fn fs_error(err: kfs::Error) -> io::Error {
    io::Error::other(err.to_string())
}
