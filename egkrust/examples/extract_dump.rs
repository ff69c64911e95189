//! Extract fields from a dump of EF.PD or EF.VD
//!
//! ```text
//! cargo run --example extract_dump -- pd EF.PD.bin
//! cargo run --example extract_dump -- vd EF.VD.bin
//! ```

use anyhow::{bail, Context};
use egkrust_core::constants::PD_HEADER_LEN;
use egkrust_core::extract::{extract, Document};
use egkrust_core::metadata::{pd_length, VdPointers};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(kind), Some(path)) = (args.next(), args.next()) else {
        bail!("usage: extract_dump <pd|vd> <file>");
    };

    let dump = std::fs::read(&path).with_context(|| format!("reading {}", path))?;

    let (document, payload) = match kind.as_str() {
        "pd" => {
            let len = pd_length(&dump)?;
            let end = (PD_HEADER_LEN + len).min(dump.len());
            (Document::Patient, &dump[PD_HEADER_LEN.min(end)..end])
        }
        "vd" => {
            let pointers = VdPointers::parse(&dump)?;
            let end = (pointers.vd_end + 1).min(dump.len());
            (Document::Insurance, &dump[pointers.vd_start.min(end)..end])
        }
        other => bail!("unknown file kind {:?}, expected pd or vd", other),
    };

    let extracted = extract(document, payload)?;
    for (name, value) in extracted.fields.to_map() {
        println!("{:>18}: {}", name, value);
    }
    println!();
    println!("{}", extracted.xml);

    Ok(())
}
