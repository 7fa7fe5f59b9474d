//! Zentinel SOAP codec command line tool.
//!
//! Run with: `zentinel-soap-codec --config config.yaml request.xml`
//!
//! Decodes one SOAP message, logs what was found and optionally writes it
//! back out through the negotiated encoding.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_soap_codec::{Codec, CodecConfig, Packet, SoapBindingCodec};

/// Decode and re-encode SOAP messages.
///
/// Accepts plain XML, binary XML, SOAP with attachments and MTOM bodies,
/// selected by the content type.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Content type of the input; defaults to the configured SOAP version's type
    #[arg(short = 't', long)]
    content_type: Option<String>,

    /// Accept header of the request, used for binary XML negotiation
    #[arg(long)]
    accept: Option<String>,

    /// Write the message back to stdout after decoding
    #[arg(short, long)]
    reencode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Message file, `-` for stdin
    input: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout only carries the message
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting Zentinel SOAP codec v{}", env!("CARGO_PKG_VERSION"));

    let config = if args.config.exists() {
        info!("Config file: {}", args.config.display());
        CodecConfig::from_file(&args.config).context("Failed to load config file")?
    } else {
        info!("Config file not found, using defaults");
        CodecConfig::default()
    };

    info!(
        soap_version = %config.soap_version,
        mtom = config.features.mtom,
        binary_xml = config.features.binary_xml,
        negotiation = ?config.negotiation.mode,
        "Configuration loaded"
    );

    let codec = SoapBindingCodec::new(&config);
    let content_type = args
        .content_type
        .clone()
        .unwrap_or_else(|| codec.mime_type().to_string());

    let input: Box<dyn BufRead> = if args.input.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(&args.input)
            .with_context(|| format!("Failed to open {}", args.input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut request = Packet::default();
    request.accept = args.accept.clone();
    if let Err(e) = codec.decode(input, &content_type, &mut request) {
        warn!(error = %e, "Failed to decode message");
        return Err(e).context("Failed to decode message");
    }

    let mut message = request
        .message
        .take()
        .context("Decoder produced no message")?;

    let header_names: Vec<String> = message
        .headers()
        .context("Failed to read headers")?
        .iter()
        .map(|h| h.name().to_string())
        .collect();
    info!(
        version = %message.version(),
        encoding = ?request.chosen_encoding,
        headers = ?header_names,
        payload = ?message.payload_name().map(|n| n.to_string()),
        attachments = message.attachments().len(),
        fault = message.is_fault(),
        "Decoded message"
    );

    if args.reencode {
        let mut response = request.create_response(message);
        let mut stdout = std::io::stdout().lock();
        let content_type = codec
            .encode(&mut response, &mut stdout)
            .context("Failed to encode message")?;
        stdout.flush().context("Failed to flush stdout")?;
        info!(
            content_type = %content_type.content_type,
            encoding = ?response.chosen_encoding,
            "Message written"
        );
    } else {
        message.close();
    }

    Ok(())
}
