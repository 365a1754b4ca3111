// SPDX-License-Identifier: GPL-3.0-or-later
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use log::{debug, error, info};
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::rc::Rc;

use tpm12_emu::{
    FileNvStore, FixedPlatform, SoftCrypto, Tpm, TpmOptions, TpmRc, MAX_COMMAND_SIZE,
};

/// Status for emulator transport handling.
#[derive(Debug, strum_macros::Display, PartialEq)]
pub enum TransportError {
    /// Invalid data was received from the peer.
    InvalidData,
    /// A read operation from the peer failed.
    InvalidRead,
    /// A write operation to the peer failed.
    InvalidWrite,
}

/// Read one framed TPM request: the 6-byte prefix carries the total length.
fn read_frame(stream: &mut UnixStream) -> Result<Option<Vec<u8>>, TransportError> {
    let mut header = [0u8; 6];
    let mut got = 0;
    while got < header.len() {
        match stream.read(&mut header[got..]) {
            Ok(0) if got == 0 => return Ok(None),
            Ok(0) => return Err(TransportError::InvalidData),
            Ok(n) => got += n,
            Err(_) => return Err(TransportError::InvalidRead),
        }
    }
    let total = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if !(header.len()..=MAX_COMMAND_SIZE).contains(&total) {
        return Err(TransportError::InvalidData);
    }
    let mut frame = vec![0u8; total];
    frame[..6].copy_from_slice(&header);
    stream
        .read_exact(&mut frame[6..])
        .or(Err(TransportError::InvalidRead))?;
    Ok(Some(frame))
}

fn serve(tpm: &mut Tpm, socket: &str) -> std::io::Result<()> {
    let _ = std::fs::remove_file(socket);
    let listener = UnixListener::bind(socket)?;
    info!("listening on {socket}");
    for stream in listener.incoming() {
        let mut stream = stream?;
        loop {
            match read_frame(&mut stream) {
                Ok(Some(frame)) => {
                    debug!("request: {} bytes", frame.len());
                    let response = tpm.execute(&frame);
                    if stream.write_all(&response).is_err() {
                        error!("{}", TransportError::InvalidWrite);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("{e}");
                    break;
                }
            }
        }
    }
    Ok(())
}

fn build_tpm(state: &str, presence: bool, locality: u8, fips: bool) -> Option<Tpm> {
    let store = FileNvStore::new(state)
        .map_err(|e| error!("{e}"))
        .ok()?;
    let platform = Rc::new(FixedPlatform::new());
    platform.presence.set(presence);
    platform.locality.set(locality);
    Tpm::new(
        Box::new(SoftCrypto),
        Box::new(store),
        Box::new(platform),
        TpmOptions { fips },
    )
    .map_err(|rc| error!("tpm init failed: {rc}"))
    .ok()
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the persistent state blobs
    #[arg(short, long, default_value = "./tpm12-state")]
    state: String,
    /// Assert physical presence
    #[arg(long)]
    physical_presence: bool,
    /// Locality modifier, 0..=4
    #[arg(long, default_value_t = 0)]
    locality: u8,
    /// Set the FIPS flag on first initialization
    #[arg(long)]
    fips: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a return code
    Rc {
        /// Return code
        #[arg(value_parser = maybe_hex::<u32>)]
        rc: u32,
    },
    /// Serve the emulator over a Unix socket
    Serve {
        #[arg(short = 'k', long, default_value = "/tmp/tpm12.sock")]
        socket: String,
    },
    /// Execute hex-encoded request frames in order
    Exec {
        /// Request frames as hex strings
        frames: Vec<String>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Rc { rc } => match TpmRc::from_repr(*rc) {
            Some(code) => println!("{code} {rc:#010x}"),
            None => println!("unknown {rc:#010x}"),
        },
        Commands::Serve { socket } => {
            let Some(mut tpm) =
                build_tpm(&cli.state, cli.physical_presence, cli.locality, cli.fips)
            else {
                std::process::exit(1);
            };
            if let Err(err) = serve(&mut tpm, socket) {
                error!("{err}");
                std::process::exit(1);
            }
        }
        Commands::Exec { frames } => {
            let Some(mut tpm) =
                build_tpm(&cli.state, cli.physical_presence, cli.locality, cli.fips)
            else {
                std::process::exit(1);
            };
            for frame in frames {
                let Ok(bytes) = hex::decode(frame) else {
                    error!("{}", TransportError::InvalidData);
                    std::process::exit(1);
                };
                let response = tpm.execute(&bytes);
                println!("{}", hex::encode(response));
            }
        }
    }
}
