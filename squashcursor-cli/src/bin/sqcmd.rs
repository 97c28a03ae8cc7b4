use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{self, Context};
use clap::{Args, Parser, Subcommand};
use squashcursor::squashfs::{Archive, Cursor, FileType, Inode};
use termion;

#[derive(Parser, Debug)]
struct Cli {
    /// The SquashFS Filesystem to operate on
    filesystem: PathBuf,

    /// The command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print file contents
    Cat(PathArgs),
    /// List files
    Ls(LsArgs),
    /// Show inode details
    Stat(PathArgs),
    /// Show extended attributes
    Xattr(PathArgs),
    /// Print the target of symbolic links
    Readlink(PathArgs),
}

#[derive(Args, Debug)]
struct PathArgs {
    files: Vec<String>,
}

#[derive(Args, Debug)]
struct LsArgs {
    #[arg(short)]
    long: bool,
    files: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let archive = Archive::open_path(&cli.filesystem)
        .context("Failed to open SquashFS")?;
    let root = archive.root();
    match &cli.command {
        Command::Cat(args) => { cmd_cat(&root, args) },
        Command::Ls(args) => { cmd_ls(&root, args) },
        Command::Stat(args) => { cmd_stat(&root, args) },
        Command::Xattr(args) => { cmd_xattr(&root, args) },
        Command::Readlink(args) => { cmd_readlink(&root, args) },
    }
}

fn cmd_cat(root: &Cursor, args: &PathArgs) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    for file_arg in &args.files {
        let file = root.open(file_arg)
            .with_context(|| format!("Cannot open '{}'", file_arg))?;
        io::copy(&mut file.stream(), &mut stdout)?;
    }
    Ok(())
}

fn cmd_ls(root: &Cursor, args: &LsArgs) -> anyhow::Result<()> {
    let default_path = vec!["/".to_string()];
    let paths = if args.files.is_empty() { &default_path } else { &args.files };
    let mut first = true;
    let single_path = paths.len() == 1;

    // First, print non-directories that directly appeared as arguments
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for file_arg in paths {
        match root.stat(file_arg) {
            Ok(inode) if inode.is_dir() => dirs.push(file_arg),
            Ok(inode) => files.push((file_arg.clone(), inode)),
            Err(e) => eprintln!("cannot access '{}': {}", file_arg, e),
        }
    }
    if !files.is_empty() {
        display(files, args.long)?;
        first = false;
    }
    // Next, print the contents of each directory argument, preceded by "<NAME>:"
    // If only a single path argument is supplied, do not precede with the "<NAME>:" header
    for file_arg in dirs {
        let dir = root.cd(file_arg)?;
        let mut files: Vec<(String, Inode)> = Vec::new();
        for de in dir.list()? {
            let de = de?;
            files.push((de.file_name(), root.archive().inode(de.inode_ref())?));
        }
        if !first { println!(); }
        if !single_path {
            println!("{}:", file_arg);
        }
        display(files, args.long)?;
        first = false;
    }
    Ok(())
}

fn cmd_stat(root: &Cursor, args: &PathArgs) -> anyhow::Result<()> {
    let archive = root.archive();
    for file_arg in &args.files {
        let inode = root.stat(file_arg)
            .with_context(|| format!("cannot stat '{}'", file_arg))?;
        println!("  File: {}", file_arg);
        println!("  Size: {:<12} Type: {}", inode.file_size(), type_name(inode.file_type()));
        println!("  Mode: ({:04o}/{})  Uid: {}  Gid: {}",
            inode.permissions(), inode_mode_string(inode.mode()), archive.uid(&inode)?, archive.gid(&inode)?);
        println!(" Inode: {:<12} Links: {}", inode.inode_number(), inode.link_count());
        if let Some(dev) = inode.device() {
            println!("Device: {},{}", (dev >> 8) & 0xfff, (dev & 0xff) | ((dev >> 12) & 0xfff00));
        }
        if let Some(target) = inode.symlink_target() {
            println!("  Link: {}", String::from_utf8_lossy(target));
        }
        println!("Modify: {}", inode.mtime());
    }
    Ok(())
}

fn cmd_xattr(root: &Cursor, args: &PathArgs) -> anyhow::Result<()> {
    let archive = root.archive();
    for file_arg in &args.files {
        let inode = root.stat(file_arg)
            .with_context(|| format!("cannot stat '{}'", file_arg))?;
        if args.files.len() > 1 {
            println!("{}:", file_arg);
        }
        for x in archive.xattrs(&inode)? {
            println!("{}={}", String::from_utf8_lossy(&x.full_name()), String::from_utf8_lossy(&x.value));
        }
    }
    Ok(())
}

fn cmd_readlink(root: &Cursor, args: &PathArgs) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    for file_arg in &args.files {
        let target = root.read_link(file_arg)
            .with_context(|| format!("cannot read link '{}'", file_arg))?;
        stdout.write_all(&target)?;
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

fn display(files: Vec<(String, Inode)>, long: bool) -> anyhow::Result<()> {
    if long {
        display_files_long(files)
    } else {
        display_files(files)
    }
}

fn display_files(files: Vec<(String, Inode)>) -> anyhow::Result<()> {
    if files.is_empty() {
        return Ok(());
    }

    if termion::is_tty(&io::stdout()) {
        let (term_width, _) = termion::terminal_size()
            .context("Failed to read terminal size")?;
        let term_width: usize = term_width as usize;

        // The correct number of columns is somewhere between width/max_col_length and
        // width/min_col_length
        let lengths: Vec<usize> = files.iter().map(|(s, _)| s.len()).collect();
        let longest = lengths.iter().copied().max().unwrap_or(0);
        let shortest = lengths.iter().copied().min().unwrap_or(0);
        let min_columns = (term_width / (longest + 2)).max(1);
        let max_columns = (term_width / (shortest + 2)).max(1);

        let mut columns = max_columns;
        let mut col_widths: Vec<usize> = Vec::new();
        let mut files_per_column = 0;
        while columns >= min_columns {
            files_per_column = usize::div_ceil(lengths.len(), columns);
            // Figure out the width of each column
            col_widths = (0..columns).map(|c|
                lengths.iter()
                    .skip(files_per_column * c)
                    .take(files_per_column)
                    .map(|l| *l + 3)
                    .max()
                    .unwrap_or(0)
                ).collect();
            if col_widths.iter().sum::<usize>() <= term_width {
                break;
            }
            columns -= 1;
        }

        for row in 0..files_per_column {
            for (n, (filename, _)) in files.iter().skip(row).step_by(files_per_column).enumerate() {
                if n != 0 {
                    print!("   ");
                }
                print!("{:1$}", filename, col_widths[n].saturating_sub(3));
            }
            println!();
        }
    } else {
        for (filename, _) in files {
            println!("{}", filename);
        }
    }
    Ok(())
}

fn display_files_long(files: Vec<(String, Inode)>) -> anyhow::Result<()> {
    for (filename, inode) in files {
        let link_postfix = match inode.symlink_target() {
            Some(target) => format!(" -> {}", String::from_utf8_lossy(target)),
            None => String::new(),
        };
        println!("{} {:>4} {:>10} {}{}",
            inode_mode_string(inode.mode()), inode.link_count(), inode.file_size(), filename, link_postfix);
    }
    Ok(())
}

fn type_name(t: FileType) -> &'static str {
    match t {
        FileType::Directory => "directory",
        FileType::File => "regular file",
        FileType::Symlink => "symbolic link",
        FileType::BlockDevice => "block special file",
        FileType::CharDevice => "character special file",
        FileType::Fifo => "fifo",
        FileType::Socket => "socket",
    }
}

fn inode_mode_string(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    let mode_type = (mode & 0o170000) >> 12;
    let ch = match mode_type {
        1 => 'p',  // Pipe
        2 => 'c',  // char-dev
        4 => 'd',  // dir
        6 => 'b',  // block-dev
        8 => '-',  // file
        10 => 'l', // symlink
        12 => 's', // socket
        _ => '?',  // unknown
    };

    s.push(ch);
    for (bit, c) in [(0o400, 'r'), (0o200, 'w'), (0o100, 'x'), (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x')]
    {
        s.push(if mode & bit != 0 { c } else { '-' });
    }
    s
}
