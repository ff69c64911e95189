//! Read an eGK through a PC/SC reader
//!
//! Set `EGK_READER` to pick a reader by name, `RUST_LOG` for log output.

use egkrust::{CardReader, ChannelSink, Field, PcscChannel, PcscConfig, SessionEvent};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    for name in PcscChannel::list_readers()? {
        println!("Reader: {}", name);
    }

    let mut config = PcscConfig::default();
    if let Ok(reader) = std::env::var("EGK_READER") {
        config = config.with_reader(reader);
    }

    let channel = PcscChannel::open(config)?;
    let (sink, mut events) = ChannelSink::new();
    let reader = CardReader::new(channel).with_sink(sink);

    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Log(message) => println!("  {}", message),
                SessionEvent::Error(message) => eprintln!("! {}", message),
                SessionEvent::CardDataRead(_) => println!("  Card data received"),
            }
        }
    });

    let result = reader.read_egk_card().await;
    drop(reader);
    progress.await?;

    let data = result?;
    println!();
    for field in Field::ALL {
        if matches!(field, Field::RawPatientXml | Field::RawInsuranceXml) {
            continue;
        }
        if let Some(value) = data.get(field) {
            println!("{:>18}: {}", field, value);
        }
    }

    Ok(())
}
