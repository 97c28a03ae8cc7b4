/// Dump contents of a SquashFS starting at a specified path
use std::env;

use anyhow::{self, Context};
use squashcursor::squashfs::{Archive, Cursor};

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let sqfs_path = args.next().context("usage: subtree <squashfs> [path]")?;
    let p = args.next().unwrap_or_else(|| "/".to_string());

    let archive = Archive::open_path(&sqfs_path)?;
    let top = archive.root().cd(&p)?;
    let (files, bytes) = read_tree(&top, true)?;
    println!("{}: {} files, {} bytes", String::from_utf8_lossy(&top.path()), files, bytes);
    Ok(())
}

// Walk the tree below `top` without recursion, optionally reading every file
fn read_tree(top: &Cursor, content: bool) -> anyhow::Result<(u32, u64)> {
    let mut dirs = vec![top.clone()];
    let mut files = 0;
    let mut bytes = 0;

    while let Some(dir) = dirs.pop() {
        for de in dir.list()? {
            let de = de?;
            if de.is_dir() {
                dirs.push(dir.cd(de.name())?);
                continue;
            }
            let inode = dir.archive().inode(de.inode_ref())?;
            if let Some(file) = dir.archive().open_file(&inode)? {
                files += 1;
                if content {
                    bytes += std::io::copy(&mut file.stream(), &mut std::io::sink())?;
                }
            }
        }
    }
    Ok((files, bytes))
}
