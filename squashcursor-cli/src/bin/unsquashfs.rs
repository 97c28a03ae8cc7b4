use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use squashcursor::squashfs::{Archive, Cursor, DirectoryEntry, FileType, Inode};

#[derive(Parser, Debug)]
struct Args {
    filesystem: PathBuf,
    files: Vec<PathBuf>,

    #[clap(short, long="dest", default_value="squashfs-root")]
    dir: PathBuf,

    #[clap(short, action)]
    list_filesystem: bool,

    #[clap(long="cat", action)]
    cat_files: bool,
}

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

// What to do with each entry selected by the file arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    List,
    Cat,
    Extract,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mode = if args.list_filesystem {
        Mode::List
    } else if args.cat_files {
        Mode::Cat
    } else {
        Mode::Extract
    };

    let archive = Archive::open_path(&args.filesystem)?;
    let file_list = if args.files.is_empty() {
        vec![args.dir.clone()]
    } else {
        args.files.iter()
            .map(|f| args.dir.join(f.strip_prefix("/").unwrap_or(f)))
            .collect()
    };

    let root = archive.root();
    match mode {
        Mode::List => println!("{}", args.dir.display()),
        Mode::Extract => fs::create_dir_all(&args.dir)?,
        Mode::Cat => {},
    }
    let mut extracted = 0;
    for d in root.list()? {
        extracted += descend(&root, &file_list, &args.dir, &d?, mode)?;
    }
    if mode == Mode::Extract {
        println!("created {} inodes in {}", extracted, args.dir.display());
    }
    Ok(())
}

fn descend(dir: &Cursor, files: &[PathBuf], parent: &Path, d: &DirectoryEntry, mode: Mode) -> Result<u32> {
    // A name that could escape the destination directory is never valid in a listing
    if d.name() == b"." || d.name() == b".." || d.name().contains(&b'/') {
        log::warn!("skipping bad entry name '{}' in {}", d.file_name(), parent.display());
        return Ok(0);
    }
    let path = parent.join(d.file_name());

    if !files.iter().any(|p| path.starts_with(p) || p.starts_with(&path)) {
        return Ok(0);
    }

    let inode = dir.archive().inode(d.inode_ref())?;
    let mut count = 0;
    match mode {
        Mode::List => println!("{}", path.display()),
        Mode::Cat => {
            if let Some(file) = dir.archive().open_file(&inode)? {
                let mut r = file.into_stream();
                let stdout = io::stdout();
                let mut stdout = stdout.lock();
                io::copy(&mut r, &mut stdout)?;
            }
        },
        Mode::Extract => {
            count += extract(dir, d, &inode, &path)?;
        },
    }

    if inode.is_dir() {
        let sub = dir.cd(d.name())?;
        for d in sub.list()? {
            count += descend(&sub, files, &path, &d?, mode)?;
        }
        // Only now, so a read-only directory can still be filled
        if mode == Mode::Extract {
            set_permissions(&path, FileType::Directory, inode.permissions())?;
        }
    }
    Ok(count)
}

// Create one entry on disk. Directory permissions are applied once their contents are written.
fn extract(dir: &Cursor, d: &DirectoryEntry, inode: &Inode, path: &Path) -> Result<u32> {
    match inode.file_type() {
        FileType::Directory => fs::create_dir_all(path)?,
        FileType::File => {
            let mut r = dir.open(d.name())?.into_stream();
            let mut out = File::create(path)?;
            io::copy(&mut r, &mut out)?;
        },
        FileType::Symlink => {
            let target = inode.symlink_target().unwrap_or_default();
            make_symlink(target, path)?;
        },
        other => {
            log::warn!("not extracting {:?} '{}'", other, path.display());
            return Ok(0);
        },
    }
    if !inode.is_dir() {
        set_permissions(path, inode.file_type(), inode.permissions())?;
    }
    log::debug!("extracted {}", path.display());
    Ok(1)
}

#[cfg(unix)]
fn make_symlink(target: &[u8], path: &Path) -> io::Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(OsStr::from_bytes(target), path)
}

#[cfg(not(unix))]
fn make_symlink(target: &[u8], path: &Path) -> io::Result<()> {
    log::warn!("symbolic links are not supported here, skipping '{}' -> '{}'",
        path.display(), String::from_utf8_lossy(target));
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, file_type: FileType, permissions: u16) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // Link permissions are not meaningful, and chmod would follow the link
    if file_type == FileType::Symlink {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(u32::from(permissions) & 0o7777))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _file_type: FileType, _permissions: u16) -> io::Result<()> {
    Ok(())
}
