//! `uefi-helper`: parse a flash image (or reload an extracted directory),
//! then run one of the tree operations over it.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::error;

use uefikit_codecs::well_known_registry;
use uefikit_image::manifest::DirStore;
use uefikit_image::visitors::{file_predicate, Assemble, Dump, Extract, Find, JsonPrint, ParseDir};
use uefikit_image::{parse_image, Firmware, ParseContext, Visitor};

/// Inspect, extract, and reassemble UEFI flash images.
#[derive(Parser)]
#[command(name = "uefi-helper", version, about, long_about = None)]
struct Cli {
    /// Flash image, bare firmware volume, or previously extracted directory
    image: PathBuf,

    #[command(subcommand)]
    cmd: Option<Cmd>,

    /// Allow extraction into a non-empty directory
    #[arg(long)]
    force: bool,

    /// Remove the target directory before extraction
    #[arg(long)]
    remove: bool,

    /// System brotli command used for brotli encoding
    #[arg(long = "brotliPath", default_value = "brotli")]
    brotli_path: String,

    /// System xz command used for LZMA encoding
    #[arg(long = "xzPath", default_value = "xz")]
    xz_path: String,
}

#[derive(Subcommand)]
enum Cmd {
    /// Find files by GUID or UI name (anchored, case-insensitive regex)
    Find { pattern: String },
    /// Dump the single file matching the pattern to a path
    Dump { pattern: String, out: PathBuf },
    /// Extract the tree into a directory with a summary.json manifest
    Extract { dir: PathBuf },
    /// Print the parsed tree as JSON
    Json,
}

fn run(cli: Cli) -> Result<()> {
    let registry = well_known_registry(&cli.xz_path, &cli.brotli_path);
    let mut ctx = ParseContext::new(&registry);

    let metadata = fs::metadata(&cli.image)
        .with_context(|| format!("cannot access {}", cli.image.display()))?;
    let mut root: Firmware = if metadata.is_dir() {
        let mut reload = ParseDir::new(Box::new(DirStore::new(&cli.image)));
        let mut root = reload
            .parse()
            .with_context(|| format!("reloading {}", cli.image.display()))?;
        Assemble::new(&mut ctx).run(&mut root).context("reassembling the reloaded tree")?;
        root
    } else {
        let data =
            fs::read(&cli.image).with_context(|| format!("reading {}", cli.image.display()))?;
        parse_image(&data, &mut ctx)
            .with_context(|| format!("parsing {}", cli.image.display()))?
    };

    match cli.cmd {
        None => Ok(()),
        Some(Cmd::Find { pattern }) => {
            let mut find = Find::new(file_predicate(&pattern)?);
            find.run(&mut root)?;
            serde_json_print(&find.matches)
        }
        Some(Cmd::Dump { pattern, out }) => {
            let writer = fs::File::create(&out)
                .with_context(|| format!("creating {}", out.display()))?;
            let mut dump = Dump { predicate: file_predicate(&pattern)?, writer };
            dump.run(&mut root)?;
            Ok(())
        }
        Some(Cmd::Extract { dir }) => {
            let mut extract = Extract::new(dir, cli.force, cli.remove);
            extract.run(&mut root)?;
            Ok(())
        }
        Some(Cmd::Json) => {
            let mut json = JsonPrint { writer: io::stdout().lock() };
            json.run(&mut root)?;
            Ok(())
        }
    }
}

fn serde_json_print(matches: &[Firmware]) -> Result<()> {
    let stdout = io::stdout().lock();
    serde_json::to_writer_pretty(stdout, matches)?;
    println!();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
