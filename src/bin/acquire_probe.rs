//! acquire_probe - resolve one image source from the command line.
//!
//! Prints the classification and either `WIDTHxHEIGHT` or `absent`.
//! Exits with status 1 when the source cannot be acquired.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use stream_detect::{config::ServerConfig, resolver_from_config, SourceDescriptor};

#[derive(Parser, Debug)]
#[command(author, version, about = "Acquire a single image and report its size")]
struct Args {
    /// RTSP URL, HTTP(S) URL, data URL or local path.
    source: String,

    /// Treat SOURCE as an inline base64 payload even without a `data:` prefix.
    #[arg(long)]
    inline: bool,

    /// Path to a JSON or TOML config file.
    #[arg(long, env = "DETECT_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = ServerConfig::load_from(args.config.as_deref())?;
    let resolver = resolver_from_config(&config)?;

    let descriptor = if args.inline {
        SourceDescriptor::InlineData {
            payload: args.source,
        }
    } else {
        resolver.classify(&args.source)
    };
    println!("source: {}", descriptor.kind());

    match resolver.acquire(&descriptor) {
        Ok(image) => {
            println!("image: {}x{}", image.width(), image.height());
            Ok(())
        }
        Err(absence) => {
            println!("image: absent ({})", absence);
            std::process::exit(1);
        }
    }
}
