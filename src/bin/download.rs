//! List, download, or manage recordings on a sensor's filesystem.
//!
//! Usage:
//!   imu-download <DEVICE> --ls                 list files
//!   imu-download <DEVICE> <FILENAME>           download one file
//!   imu-download <DEVICE> --all                download every file
//!   imu-download <DEVICE> --format             erase the filesystem
//!
//! `--delete` removes each file from the device after a successful download.
//! DEVICE is an `IMU_*` name, `usb`, or a serial port path.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use log::info;

use imu_rs::prelude::*;

struct Args {
    device: String,
    filename: Option<String>,
    ls: bool,
    all: bool,
    format: bool,
    delete: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        device: String::new(),
        filename: None,
        ls: false,
        all: false,
        format: false,
        delete: false,
    };

    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--ls" => args.ls = true,
            "--all" => args.all = true,
            "--format" => args.format = true,
            "--delete" => args.delete = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    args.device = positional
        .next()
        .context("usage: imu-download <DEVICE> [FILENAME] [--ls|--all|--format] [--delete]")?;
    args.filename = positional.next();

    let modes = args.ls as u8 + args.all as u8 + args.format as u8;
    if modes > 1 || (args.filename.is_some() && modes > 0) {
        bail!("pass exactly one of FILENAME, --ls, --all, or --format");
    }
    if args.filename.is_none() && modes == 0 {
        bail!("no action given; pass a FILENAME, --ls, --all, or --format");
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;

    let client = ImuClient::new(ImuClientConfig::default());
    let device = client.connect_one(&args.device).await?;
    device
        .init(InitOptions {
            set_time: true,
            abort_recording: true,
            abort_streaming: true,
        })
        .await?;

    let result = run(&device, &args).await;
    device.disconnect().await;
    result
}

async fn run(device: &Device, args: &Args) -> Result<ExitCode> {
    if args.ls {
        list(device).await?;
    } else if args.format {
        info!("formatting storage on {}…", device.name());
        device.format_filesystem().await?;
        info!("formatting complete");
    } else if args.all {
        let files = list(device).await?;
        let mut failed = Vec::new();
        for (i, file) in files.iter().enumerate() {
            info!(
                "downloading file {} of {}: {:?}…",
                i + 1,
                files.len(),
                file.filename
            );
            if let Err(e) = download_one(device, &file.filename, args.delete).await {
                log::error!("{}: {e}", file.filename);
                failed.push(file.filename.clone());
            }
        }
        if !failed.is_empty() {
            bail!("{} of {} downloads failed: {failed:?}", failed.len(), files.len());
        }
        info!("all {} file(s) downloaded", files.len());
    } else if let Some(filename) = &args.filename {
        download_one(device, filename, args.delete).await?;
    }

    Ok(ExitCode::SUCCESS)
}

async fn list(device: &Device) -> Result<Vec<imu_rs::packets::FsFile>> {
    info!("listing files on {}…", device.name());
    let files = device.list_files().await?;
    if files.is_empty() {
        println!("no files found");
    }
    for file in &files {
        println!(
            "{:3}/{}  {:10}  {}",
            file.index + 1,
            files.len(),
            file.size,
            file.filename
        );
    }
    Ok(files)
}

async fn download_one(device: &Device, filename: &str, delete: bool) -> Result<()> {
    let out = PathBuf::from(format!("{filename}_{}.bin", device.name()));
    if out.exists() {
        bail!("output file {} already exists", out.display());
    }

    let size = device.file_size(filename).await?;
    info!("downloading {filename:?} ({size} bytes)…");

    let data = device.download(filename, None).await?;
    std::fs::write(&out, &data)?;
    info!("saved {} bytes as {}", data.len(), out.display());

    if delete {
        device.delete_file(filename).await?;
        info!("deleted {filename:?} from the device");
    }
    Ok(())
}
