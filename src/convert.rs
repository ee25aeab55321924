/// One kickstart file in, one record out: scrub, extract, release the scratch copy.
use crate::config::ParserConfig;
use crate::extract::{extract, ExtractError};
use crate::record::InvocationRecord;
use crate::scrub::{scrub, ScrubError};
use std::path::Path;

/// Fatal errors for a single input file.
#[derive(Debug)]
pub enum ConvertError {
    Scrub(ScrubError),
    Extract(ExtractError),
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::Scrub(e) => write!(f, "{e}"),
            ConvertError::Extract(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvertError::Scrub(e) => Some(e),
            ConvertError::Extract(e) => Some(e),
        }
    }
}

impl From<ScrubError> for ConvertError {
    fn from(e: ScrubError) -> Self {
        ConvertError::Scrub(e)
    }
}

impl From<ExtractError> for ConvertError {
    fn from(e: ExtractError) -> Self {
        ConvertError::Extract(e)
    }
}

/// Parse the kickstart output at `path` into a normalized record.
///
/// The scratch copy made for contaminated inputs is removed before returning,
/// whether or not extraction succeeded.
pub fn convert(path: &Path, config: &ParserConfig) -> Result<InvocationRecord, ConvertError> {
    let span = tracing::info_span!("convert", file = %path.display());
    let _enter = span.enter();

    let source = scrub(path, &config.scrub)?;
    tracing::debug!(
        scrubbed = source.is_scrubbed(),
        xml = %source.path().display(),
        "parsing kickstart document"
    );
    let result = extract(source.path(), config);
    source.release();
    Ok(result?)
}
