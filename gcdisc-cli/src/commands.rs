use crate::opt::{Action, Args};
use anyhow::{bail, Context, Result};
use gcdisc::common::MappedStream;
use gcdisc::disc::IsoArchive;
use log::info;
use std::fs;
use std::path::PathBuf;

pub fn execute(args: &Args) -> Result<()> {
    let mut iso = IsoArchive::open_image_file(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?;
    info!("Opened {} ({} files)", iso.game_id(), iso.file_list().len());

    if args.defragment {
        iso.defragment();
        info!("Defragmented the data region");
    }

    match args.action {
        Action::Extract => extract(&iso, args),
        Action::Save => save(&mut iso, args),
    }
}

fn extract(iso: &IsoArchive<MappedStream>, args: &Args) -> Result<()> {
    let out_dir = args.output.clone().unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    for name in iso.file_list() {
        let file = iso.extract(&name)?;
        fs::write(out_dir.join(&name), file.bytes()?)?;
        info!("Extracted {}", name);
    }
    if args.with_system_files {
        fs::write(out_dir.join("system.bin"), iso.extract_system_blob()?)?;
        info!("Extracted system.bin");
    }
    Ok(())
}

fn save(iso: &mut IsoArchive<MappedStream>, args: &Args) -> Result<()> {
    let Some(output) = &args.output else {
        bail!("save requires an output path");
    };
    iso.save_to_path(output).with_context(|| format!("failed to write {}", output.display()))?;
    info!("Saved image to {}", output.display());
    Ok(())
}
