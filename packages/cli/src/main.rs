#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the postcode polygons toolchain.
//!
//! ```text
//! postcode_polygons extract gb-postcodes.tar.gz [--out data/postcodes] [--compression zstd]
//! postcode_polygons serve [--config server.toml] [--port 8080]
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use postcode_polygons_boundaries::Compression;
use postcode_polygons_boundaries::prepare::extract_archive;
use postcode_polygons_server::{ServerConfig, run_server};

#[derive(Parser)]
#[command(
    name = "postcode_polygons",
    about = "Prepare and serve UK postcode boundary polygons"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack a postcode boundary archive into per-district polygon files
    Extract {
        /// Tar archive (`.tar`, `.tar.gz`, `.tgz`, `.tar.zst` or `.tar.bz2`)
        archive: PathBuf,
        /// Output directory for `units/` and `districts/`
        #[arg(long, default_value = "data/postcodes")]
        out: PathBuf,
        /// Compression for the written files (gzip, zstd or bzip2)
        #[arg(long, default_value = "gzip")]
        compression: Compression,
    },
    /// Start the HTTP API server
    Serve {
        /// TOML config file (falls back to `CONFIG_PATH`)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Address to bind
        #[arg(long)]
        bind_addr: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Code-Point Open zip archive or CSV
        #[arg(long)]
        codepoint: Option<PathBuf>,
        /// Directory holding the prepared polygon files
        #[arg(long)]
        polygon_dir: Option<PathBuf>,
        /// Compression of the prepared polygon files
        #[arg(long)]
        compression: Option<Compression>,
    },
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            archive,
            out,
            compression,
        } => {
            let summary = extract_archive(&archive, &out, compression)?;
            println!(
                "Wrote {} files ({} already present, {} entries ignored) to {}",
                summary.written,
                summary.skipped,
                summary.ignored,
                out.display()
            );
        }
        Commands::Serve {
            config,
            bind_addr,
            port,
            codepoint,
            polygon_dir,
            compression,
        } => {
            let config = config.or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from));
            let mut server_config = ServerConfig::load(config.as_deref())?;

            if let Some(bind_addr) = bind_addr {
                server_config.bind_addr = bind_addr;
            }
            if let Some(port) = port {
                server_config.port = port;
            }
            if let Some(path) = codepoint {
                server_config.codepoint_path = path;
            }
            if let Some(dir) = polygon_dir {
                server_config.polygon_dir = dir;
            }
            if let Some(compression) = compression {
                server_config.compression = compression;
            }

            log::debug!("Effective configuration: {server_config:?}");
            run_server(server_config).await?;
        }
    }

    Ok(())
}
