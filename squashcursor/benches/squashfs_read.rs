use std::io::BufReader;

use anyhow;
use criterion::{criterion_group, criterion_main, Criterion};

use squashcursor::squashfs::{Archive, ArchiveOptions, Cursor};

#[path = "../tests/common/mod.rs"]
mod common;
use common::{dir, file, pattern, symlink, Builder, Node};

const LAYOUTS: [(&str, bool); 2] = [("uncompressed", false), ("gzip", true)];

// A few hundred small files spread over nested directories, plus some multi-block files
fn bench_tree() -> Node {
    let mut top = Vec::new();
    for d in 0..8 {
        let mut entries = Vec::new();
        for f in 0..40 {
            entries.push((format!("file{f:02}.txt"), file(format!("directory {d} file {f}\n").repeat(f + 1))));
        }
        entries.push(("big.bin".to_string(), file(pattern(300_000 + d * 1000))));
        entries.push(("self".to_string(), symlink(".")));
        top.push((format!("dir{d}"), Node::Dir(entries.into_iter().map(|(n, e)| (n.into_bytes(), e)).collect())));
    }
    Node::Dir(top.into_iter().map(|(n, e)| (n.into_bytes(), e)).collect())
}

fn image(compress: bool) -> Vec<u8> {
    Builder { block_log: 17, compress, ..Builder::new() }.build(&bench_tree())
}

fn read_root(image: &[u8]) -> anyhow::Result<usize> {
    let archive = Archive::open(image.to_vec())?;
    let root_count = archive.root().list()?.count();
    Ok(root_count)
}

fn read_tree(image: &[u8], content: bool) -> anyhow::Result<u32> {
    let archive = Archive::open_with(image.to_vec(), ArchiveOptions::new().data_cache_blocks(4))?;
    let total = read_and_descend(&archive.root(), content)?;
    Ok(total)
}

fn read_and_descend(cursor: &Cursor, content: bool) -> anyhow::Result<u32> {
    let mut total = 0;
    for de in cursor.list()? {
        let de = de?;
        if content && de.file_type() == squashcursor::squashfs::FileType::File {
            let mut reader = BufReader::new(cursor.open(de.name())?.into_stream());
            std::io::copy(&mut reader, &mut std::io::sink())?;
        }
        // Recurse into subdirectories
        if de.is_dir() {
            total += read_and_descend(&cursor.cd(de.name())?, content)?;
        }
        total += 1;
    }
    Ok(total)
}

fn random_reads(image: &[u8]) -> anyhow::Result<usize> {
    let archive = Archive::open(image.to_vec())?;
    let f = archive.root().open("dir3/big.bin")?;
    let mut total = 0;
    for i in 0..64u64 {
        let offset = (i * 48_271) % f.size();
        total += f.read(offset, 4096)?.len();
    }
    Ok(total)
}

fn root_benchmark(c: &mut Criterion) {
    for (name, compress) in LAYOUTS {
        let image = image(compress);
        c.bench_function(&format!("{name} - Read Root Dir"), |b| b.iter(|| read_root(&image)));
    }
}

fn tree_benchmark(c: &mut Criterion) {
    for (name, compress) in LAYOUTS {
        let image = image(compress);
        let mut group = c.benchmark_group("full-tree-read");
        group.sample_size(100);
        group.bench_function(&format!("{name} - Read Tree"), |b| b.iter(|| read_tree(&image, false)));
        group.finish();
    }
}

fn data_benchmark(c: &mut Criterion) {
    for (name, compress) in LAYOUTS {
        let image = image(compress);
        let mut group = c.benchmark_group("full-data-read");
        group.sample_size(20);
        group.bench_function(&format!("{name} - Read Content"), |b| b.iter(|| read_tree(&image, true)));
        group.bench_function(&format!("{name} - Random Reads"), |b| b.iter(|| random_reads(&image)));
        group.finish();
    }
}

criterion_group!(benches, root_benchmark, tree_benchmark, data_benchmark);
criterion_main!(benches);
