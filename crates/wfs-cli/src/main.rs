#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use wfs::{FileType, InodeNo, SetAttr, WfsError, WrenFs, ROOT_INO};

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "wfs", about = "WrenFS — journaled in-image filesystem toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh filesystem image.
    Mkfs {
        /// Path for the new image file.
        image: PathBuf,
        /// Total blocks in the image.
        #[arg(long, default_value_t = 4096)]
        blocks: u32,
        /// Inode records in the inode table.
        #[arg(long, default_value_t = 256)]
        inodes: u32,
    },
    /// Show the superblock and usage summary.
    Inspect {
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Run the read-only integrity scan.
    Check {
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// List a directory inside the image.
    Ls {
        image: PathBuf,
        /// Path inside the image.
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file's contents to stdout.
    Cat {
        image: PathBuf,
        /// Path inside the image.
        path: String,
    },
    /// Copy a local file into the image.
    Put {
        image: PathBuf,
        /// Local source file.
        local: PathBuf,
        /// Destination path inside the image.
        path: String,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput {
    nblocks: u32,
    ninodes: u32,
    firstinob: u32,
    firstjournalb: u32,
    njournalb: u32,
    firstdatab: u32,
    free_blocks: u32,
    live_inodes: u32,
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn load(image: &Path) -> Result<WrenFs> {
    let bytes = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    WrenFs::mount(bytes).with_context(|| format!("mounting {}", image.display()))
}

fn save(image: &Path, fs_handle: &WrenFs) -> Result<()> {
    fs::write(image, fs_handle.as_bytes())
        .with_context(|| format!("writing {}", image.display()))
}

/// Walk an absolute path inside the image, component by component.
fn resolve(fs_handle: &WrenFs, path: &str) -> Result<InodeNo> {
    let mut ino = ROOT_INO;
    for comp in path.split('/').filter(|c| !c.is_empty()) {
        ino = fs_handle
            .lookup(ino, comp)
            .with_context(|| format!("looking up '{comp}' in '{path}'"))?;
    }
    Ok(ino)
}

/// Split an in-image path into its parent directory path and final name.
fn split_parent(path: &str) -> Result<(String, String)> {
    let mut comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let Some(name) = comps.pop() else {
        bail!("'{path}' has no file name");
    };
    Ok((comps.join("/"), name.to_owned()))
}

fn kind_letter(kind: FileType) -> char {
    match kind {
        FileType::Regular => '-',
        FileType::Directory => 'd',
        FileType::Symlink => 'l',
    }
}

// ── Commands ────────────────────────────────────────────────────────────────

fn cmd_mkfs(image: &Path, blocks: u32, inodes: u32) -> Result<()> {
    let fs_handle = WrenFs::format(blocks, inodes)
        .with_context(|| format!("formatting {blocks} blocks / {inodes} inodes"))?;
    save(image, &fs_handle)?;
    println!(
        "{}: {blocks} blocks, {inodes} inodes, data starts at block {}",
        image.display(),
        fs_handle.image().superblock().firstdatab
    );
    Ok(())
}

fn cmd_inspect(image: &Path, json: bool) -> Result<()> {
    let fs_handle = load(image)?;
    let sb = fs_handle.image().superblock();
    let report = fs_handle.check()?;
    let out = InspectOutput {
        nblocks: sb.nblocks,
        ninodes: sb.ninodes,
        firstinob: sb.firstinob,
        firstjournalb: sb.firstjournalb,
        njournalb: sb.njournalb,
        firstdatab: sb.firstdatab,
        free_blocks: report.free_blocks,
        live_inodes: report.live_inodes,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("blocks:        {}", out.nblocks);
        println!("inodes:        {}", out.ninodes);
        println!("inode table:   block {}", out.firstinob);
        println!("journal:       blocks {}..{}", out.firstjournalb, out.firstjournalb + out.njournalb);
        println!("data region:   blocks {}..{}", out.firstdatab, out.nblocks);
        println!("free blocks:   {}", out.free_blocks);
        println!("live inodes:   {}", out.live_inodes);
    }
    Ok(())
}

fn cmd_check(image: &Path, json: bool) -> Result<()> {
    let fs_handle = load(image)?;
    let report = fs_handle.check()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_clean() {
        println!(
            "clean: {} live inodes, {} reachable blocks, {} free",
            report.live_inodes, report.reachable_blocks, report.free_blocks
        );
    } else {
        for err in &report.errors {
            eprintln!("error: {err}");
        }
        bail!("{} integrity error(s)", report.errors.len());
    }
    Ok(())
}

fn cmd_ls(image: &Path, path: &str) -> Result<()> {
    let fs_handle = load(image)?;
    let dir = resolve(&fs_handle, path)?;
    let mut cursor = 0;
    while let Some(entry) = fs_handle.readdir(dir, dir, cursor)? {
        let stat = fs_handle.stat(entry.ino)?;
        println!(
            "{}{:o} {:>2} {:>8} {}",
            kind_letter(entry.kind),
            stat.mode,
            stat.nlink,
            stat.size,
            entry.name
        );
        cursor = entry.next_cursor;
    }
    Ok(())
}

fn cmd_cat(image: &Path, path: &str) -> Result<()> {
    let fs_handle = load(image)?;
    let ino = resolve(&fs_handle, path)?;
    let stat = fs_handle.stat(ino)?;
    let mut buf = vec![0_u8; stat.size as usize];
    let n = fs_handle.read(ino, 0, &mut buf)?;
    std::io::stdout().write_all(&buf[..n])?;
    Ok(())
}

fn cmd_put(image: &Path, local: &Path, path: &str) -> Result<()> {
    let data = fs::read(local).with_context(|| format!("reading {}", local.display()))?;
    let mut fs_handle = load(image)?;
    let (parent, name) = split_parent(path)?;
    let dir = resolve(&fs_handle, &parent)?;

    let ino = match fs_handle.create(dir, &name, 0o644) {
        Ok(ino) => ino,
        Err(WfsError::Exists) => {
            let ino = fs_handle.lookup(dir, &name)?;
            fs_handle.setattr(
                ino,
                SetAttr {
                    size: Some(0),
                    mode: None,
                },
            )?;
            ino
        }
        Err(err) => return Err(err.into()),
    };
    fs_handle.write(ino, 0, &data, false)?;
    save(image, &fs_handle)?;
    println!("{} -> {path} ({} bytes)", local.display(), data.len());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Mkfs {
            image,
            blocks,
            inodes,
        } => cmd_mkfs(&image, blocks, inodes),
        Command::Inspect { image, json } => cmd_inspect(&image, json),
        Command::Check { image, json } => cmd_check(&image, json),
        Command::Ls { image, path } => cmd_ls(&image, &path),
        Command::Cat { image, path } => cmd_cat(&image, &path),
        Command::Put { image, local, path } => cmd_put(&image, &local, &path),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
