use crate::record::InvocationRecord;
use std::path::Path;

/// Render a record as JSON with 2-space indentation, in record field order.
pub fn render(record: &InvocationRecord) -> serde_json::Result<String> {
    serde_json::to_string_pretty(record)
}

/// Write the record to `output`, or to stdout when no path is given.
pub fn write_record(record: &InvocationRecord, output: Option<&Path>) -> std::io::Result<()> {
    let json = render(record)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!("JSON file written to \"{}\".", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
