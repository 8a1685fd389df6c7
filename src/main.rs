//! Command-line front-end for remzip.
//!
//! Lists, prints and appends to ZIP archives that live on the local
//! filesystem or behind an HTTP server with Range support.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use remzip::{Cli, HttpRangeReader, LocalFile, OpenFlags, RemoteFile, ZipArchive};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.is_http_url() {
        if cli.append.is_some() {
            bail!("appending over HTTP is not supported (the transport is read-only)");
        }

        let reader = HttpRangeReader::new(cli.target.clone()).await?;
        let counter = reader.transfer_counter();
        process_archive(reader, &cli).await?;

        // network transfer statistics for remote targets
        if !cli.is_quiet() {
            eprintln!("\nTotal bytes transferred: {}", format_size(counter.bytes()));
        }
    } else {
        let path = Path::new(&cli.target);
        if cli.append.is_some() {
            process_archive(LocalFile::open_rw(path)?, &cli).await?;
        } else {
            process_archive(LocalFile::open(path)?, &cli).await?;
        }
    }

    Ok(())
}

/// Dispatch on CLI mode: append, print-to-pipe, or list.
async fn process_archive<F: RemoteFile + 'static>(file: F, cli: &Cli) -> Result<()> {
    let flags = if cli.append.is_some() {
        OpenFlags::UPDATE | OpenFlags::NEW
    } else {
        OpenFlags::READ
    };
    let mut archive = ZipArchive::open(file, flags).await?;

    if let Some(ref local) = cli.append {
        return append_member(archive, local, cli).await;
    }

    if cli.pipe {
        print_members(&mut archive, cli).await?;
    } else {
        list_files(&archive, cli.verbose)?;
    }

    archive.close().await?;
    Ok(())
}

/// Append a local file as a new stored member and finalize the archive.
async fn append_member<F: RemoteFile>(
    mut archive: ZipArchive<F>,
    local: &str,
    cli: &Cli,
) -> Result<()> {
    let data = tokio::fs::read(local)
        .await
        .with_context(|| format!("reading {local}"))?;
    let crc32 = crc32fast::hash(&data);

    let name = match &cli.member_name {
        Some(name) => name.clone(),
        None => Path::new(local)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| local.to_string()),
    };

    archive
        .open_file(&name, OpenFlags::NEW, data.len() as u64, crc32)
        .await?;
    archive.write(&data).await?;
    archive.close_file()?;
    archive.close().await?;

    if !cli.is_quiet() {
        println!("  appended: {} ({} bytes)", name, data.len());
    }
    Ok(())
}

/// Print the selected members (default: all files) to stdout.
async fn print_members<F: RemoteFile>(archive: &mut ZipArchive<F>, cli: &Cli) -> Result<()> {
    // resolve names and sizes up front; reading needs both
    let selected: Vec<(String, u64)> = archive
        .entries()
        .filter(|e| !e.is_directory())
        .filter(|e| cli.members.is_empty() || cli.members.iter().any(|m| *m == e.file_name))
        .map(|e| (e.file_name.clone(), e.uncompressed_size))
        .collect();

    if selected.is_empty() && !cli.members.is_empty() {
        bail!("requested members not found in archive");
    }

    let show_markers = selected.len() > 1;
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 64 * 1024];

    for (name, size) in selected {
        if show_markers {
            stdout
                .write_all(format!("--- {} ---\n", name).as_bytes())
                .await?;
        }

        archive.open_file(&name, OpenFlags::READ, 0, 0).await?;
        let mut offset = 0u64;
        while offset < size {
            let n = archive.read(offset, &mut buf).await?;
            if n == 0 {
                break;
            }
            stdout.write_all(&buf[..n]).await?;
            offset += n as u64;
        }
        archive.close_file()?;
    }

    stdout.flush().await?;
    Ok(())
}

/// List archive contents, short or verbose.
fn list_files<F: RemoteFile>(archive: &ZipArchive<F>, verbose: bool) -> Result<()> {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.entries() {
        if verbose {
            let (year, month, day) = entry.decoded_date();
            let (hour, minute, _second) = entry.decoded_time();

            let ratio = if entry.uncompressed_size > 0 {
                format!(
                    "{:>4}%",
                    100 - (entry.compressed_size * 100 / entry.uncompressed_size)
                )
            } else {
                "  0%".to_string()
            };

            println!(
                "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
                entry.uncompressed_size,
                entry.compressed_size,
                ratio,
                year,
                month,
                day,
                hour,
                minute,
                entry.file_name
            );

            if !entry.is_directory() {
                total_uncompressed += entry.uncompressed_size;
                total_compressed += entry.compressed_size;
                file_count += 1;
            }
        } else {
            println!("{}", entry.file_name);
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        let total_ratio = if total_uncompressed > 0 {
            format!(
                "{:>4}%",
                100 - (total_compressed * 100 / total_uncompressed)
            )
        } else {
            "  0%".to_string()
        };
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed, total_compressed, total_ratio, "", file_count
        );
    }

    Ok(())
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
