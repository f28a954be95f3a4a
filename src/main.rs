use std::io::BufRead;

use clap::Parser;
use murmur_client::VoiceChatClient;
use murmur_core::{BusEvent, Channel, CoreConfig, EventBus};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "murmur", about = "Real-time duplex voice-chat client")]
struct Args {
    /// Voice server URL, e.g. wss://voice.example.com/ws.
    url: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Language sent with audio.start.
    #[arg(long)]
    language: Option<String>,

    /// Requested capture sample rate in Hz.
    #[arg(long)]
    sample_rate: Option<u32>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = CoreConfig::from_env();
    if let Some(language) = args.language {
        config.default_language = language;
    }
    if let Some(rate) = args.sample_rate {
        config.default_sample_rate = rate;
    }

    let bus = EventBus::global();
    subscribe_printers(&bus);

    let client = VoiceChatClient::with_defaults(config);
    tracing::info!(url = %args.url, "Connecting");
    if let Err(e) = client.connect(&args.url).await {
        tracing::error!(error = %e, "Connection failed");
        std::process::exit(1);
    }

    println!("Commands: [Enter] toggle recording, m mute/unmute, q quit");

    // Blocking stdin reader feeding the command loop.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                match line.trim() {
                    "q" => break,
                    "m" => {
                        let muted = !client.is_muted();
                        client.set_muted(muted);
                        println!("{}", if muted { "muted" } else { "unmuted" });
                    }
                    _ => {
                        if client.is_recording() {
                            match client.stop_recording().await {
                                Ok(()) => println!("recording stopped"),
                                Err(e) => println!("stop failed: {e}"),
                            }
                        } else {
                            match client.start_recording().await {
                                Ok(rate) => println!("recording at {rate} Hz"),
                                Err(e) => println!("start failed: {e}"),
                            }
                        }
                    }
                }
            }
        }
    }

    tracing::info!("Shutting down");
    client.disconnect().await;
}

fn subscribe_printers(bus: &EventBus) {
    bus.subscribe(Channel::ConnectionState, |event| {
        if let BusEvent::ConnectionState(state) = event {
            println!("connection: {state}");
        }
        Ok(())
    });
    bus.subscribe(Channel::ConnectionAck, |event| {
        if let BusEvent::ConnectionAck { session_id } = event {
            println!("session: {session_id}");
        }
        Ok(())
    });
    bus.subscribe(Channel::Error, |event| {
        if let BusEvent::Error { code, message } = event {
            match code {
                Some(code) => println!("server error: {code}: {message}"),
                None => println!("server error: {message}"),
            }
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_requires_url() {
        assert!(Args::try_parse_from(["murmur"]).is_err());
    }

    #[test]
    fn cli_parses_url_and_defaults() {
        let args = Args::parse_from(["murmur", "wss://voice.example.com/ws"]);
        assert_eq!(args.url, "wss://voice.example.com/ws");
        assert_eq!(args.log_level, "info");
        assert!(args.language.is_none());
        assert!(args.sample_rate.is_none());
    }

    #[test]
    fn cli_parses_overrides() {
        let args = Args::parse_from([
            "murmur",
            "ws://localhost:9000",
            "--language",
            "de-DE",
            "--sample-rate",
            "48000",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.language.as_deref(), Some("de-DE"));
        assert_eq!(args.sample_rate, Some(48_000));
        assert_eq!(args.log_level, "debug");
    }
}
